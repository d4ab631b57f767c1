use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, PoisonError};

use bevy::log::LogPlugin;
use bevy::math::primitives::Circle;
use bevy::prelude::*;
use bevy::sprite::{MaterialMesh2dBundle, Mesh2dHandle};
use bevy::window::PrimaryWindow;

use crate::simulation::controller::{Frame, Simulation, SimulationState};
use crate::simulation::error::SimError;
use crate::simulation::settings::{DisplayFlags, Settings};
use crate::simulation::states::{self, NVec, Rgba, SharedBodies};

#[derive(Component)]
struct BodyIndex(pub usize);

const BODY_RADIUS: f32 = 5.0; // pixels
const GRID_SPACING: f32 = 50.0; // pixels
const COM_RADIUS: f32 = 4.0;

/// Everything the render systems need; the stepping itself happens on the
/// simulation's own thread
#[derive(Resource)]
struct Viewer {
    simulation: Mutex<Simulation>,
    bodies: SharedBodies,
    frames: Mutex<Receiver<Frame>>,
    latest: Option<Frame>,
    flags: DisplayFlags,
    scale: f32, // pixels per simulation length unit
}

pub fn run_2d(settings: Settings, scale: f32) -> Result<(), SimError> {
    let flags = settings.display();
    let background = to_color(settings.background());
    let body_count = settings.bodies().len();

    let (tx, rx) = mpsc::channel();
    let mut simulation = Simulation::with_settings(settings).with_sink(tx);
    let bodies = simulation.bodies();
    simulation.start()?;

    log::info!("run_2d: starting Bevy 2D viewer with {body_count} bodies");

    App::new()
        .insert_resource(ClearColor(background))
        .insert_resource(Viewer {
            simulation: Mutex::new(simulation),
            bodies,
            frames: Mutex::new(rx),
            latest: None,
            flags,
            scale,
        })
        // env_logger is already installed; bevy's tracing subscriber would clash
        .add_plugins(DefaultPlugins.build().disable::<LogPlugin>().set(WindowPlugin {
            primary_window: Some(Window {
                title: "nbsim".into(),
                ..default()
            }),
            ..default()
        }))
        .add_systems(Startup, setup_bodies_system)
        .add_systems(
            Update,
            (
                keyboard_system,
                drain_frames_system,
                sync_transforms_system,
                draw_grid_system,
                draw_trails_system,
                draw_center_of_mass_system,
            )
                .chain(),
        )
        .run();

    Ok(())
}

fn to_color(c: Rgba) -> Color {
    Color::srgba(c.r, c.g, c.b, c.a)
}

fn to_screen(p: &NVec, scale: f32) -> Vec2 {
    Vec2::new(p[0] as f32 * scale, p[1] as f32 * scale)
}

fn setup_bodies_system(
    mut commands: Commands,
    viewer: Res<Viewer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<ColorMaterial>>,
) {
    commands.spawn(Camera2dBundle::default());

    let bodies = viewer.bodies.read();
    for (i, body) in bodies.iter().enumerate() {
        let at = to_screen(body.position(), viewer.scale);

        commands.spawn((
            MaterialMesh2dBundle {
                mesh: Mesh2dHandle(meshes.add(Circle::new(BODY_RADIUS))),
                material: materials.add(ColorMaterial::from(to_color(body.color()))),
                transform: Transform::from_xyz(at.x, at.y, 1.0),
                ..Default::default()
            },
            BodyIndex(i),
        ));
    }
}

/// Space pauses or resumes, R restarts from the initial conditions
fn keyboard_system(keys: Res<ButtonInput<KeyCode>>, viewer: Res<Viewer>) {
    let mut sim = viewer.simulation.lock().unwrap_or_else(PoisonError::into_inner);

    let result = if keys.just_pressed(KeyCode::Space) {
        match sim.state() {
            SimulationState::Active => sim.pause(),
            SimulationState::Paused | SimulationState::Inactive => sim.start(),
        }
    } else if keys.just_pressed(KeyCode::KeyR) {
        let stopped = match sim.state() {
            SimulationState::Inactive => Ok(()),
            _ => sim.stop(),
        };
        stopped.and_then(|()| sim.start())
    } else {
        Ok(())
    };

    if let Err(err) = result {
        log::warn!("viewer: {err}");
    }
}

fn drain_frames_system(mut viewer: ResMut<Viewer>) {
    let latest = viewer
        .frames
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .try_iter()
        .last();
    if let Some(frame) = latest {
        log::trace!("frame {} at t = {}", frame.tick, frame.time);
        viewer.latest = Some(frame);
    }
}

fn sync_transforms_system(viewer: Res<Viewer>, mut query: Query<(&BodyIndex, &mut Transform)>) {
    let bodies = viewer.bodies.read();
    for (BodyIndex(i), mut transform) in &mut query {
        if let Some(b) = bodies.get(*i) {
            let at = to_screen(b.position(), viewer.scale);
            transform.translation.x = at.x;
            transform.translation.y = at.y;
        }
    }
}

fn draw_grid_system(
    viewer: Res<Viewer>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut gizmos: Gizmos,
) {
    if !viewer.flags.show_grid {
        return;
    }
    let Ok(window) = windows.get_single() else {
        return;
    };
    let half_w = window.width() / 2.0;
    let half_h = window.height() / 2.0;
    let color = Color::srgba(0.5, 0.5, 0.5, 0.25);

    // Lines through the origin, then every GRID_SPACING pixels outwards
    let mut x = 0.0;
    while x <= half_w {
        gizmos.line_2d(Vec2::new(x, -half_h), Vec2::new(x, half_h), color);
        gizmos.line_2d(Vec2::new(-x, -half_h), Vec2::new(-x, half_h), color);
        x += GRID_SPACING;
    }
    let mut y = 0.0;
    while y <= half_h {
        gizmos.line_2d(Vec2::new(-half_w, y), Vec2::new(half_w, y), color);
        gizmos.line_2d(Vec2::new(-half_w, -y), Vec2::new(half_w, -y), color);
        y += GRID_SPACING;
    }
}

fn draw_trails_system(viewer: Res<Viewer>, mut gizmos: Gizmos) {
    if !viewer.flags.show_trail {
        return;
    }
    // One read guard for the whole pass so every trail comes from the same tick
    let bodies = viewer.bodies.read();
    for body in bodies.iter() {
        if body.trail().len() < 2 {
            continue;
        }
        let color = to_color(body.color()).with_alpha(0.6);
        gizmos.linestrip_2d(body.trail().iter().map(|p| to_screen(p, viewer.scale)), color);
    }
}

fn draw_center_of_mass_system(viewer: Res<Viewer>, mut gizmos: Gizmos) {
    if !viewer.flags.show_center_of_mass {
        return;
    }
    let bodies = viewer.bodies.read();
    let Some(com) = states::center_of_mass(&bodies) else {
        return;
    };
    let com = to_screen(&com, viewer.scale);
    let color = Color::srgba(1.0, 0.2, 0.2, 0.8);

    gizmos.circle_2d(com, COM_RADIUS, color);
    for body in bodies.iter() {
        gizmos.line_2d(com, to_screen(body.position(), viewer.scale), color.with_alpha(0.3));
    }
}
