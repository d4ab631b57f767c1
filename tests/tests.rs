use std::path::PathBuf;
use std::sync::mpsc;

use approx::{assert_abs_diff_eq, assert_relative_eq};

use nbsim::simulation::integrator::OdeSystem;
use nbsim::{
    flatten, unflatten, Body, BodyId, GravityModel, NVec, Scheduling, ScenarioConfig, Settings,
    SimError, Simulation, SimulationState, SolverParams, MAX_TRAIL_SIZE,
};

/// Two bodies on the x-axis, `dist` apart and centered on the origin, at rest
pub fn two_body_line(dist: f64, m1: f64, m2: f64) -> Vec<Body> {
    vec![
        Body::new(&[-dist / 2.0, 0.0, 0.0], &[0.0, 0.0, 0.0], m1).unwrap(),
        Body::new(&[dist / 2.0, 0.0, 0.0], &[0.0, 0.0, 0.0], m2).unwrap(),
    ]
}

/// Evaluate the gravity model once and return every body's acceleration
pub fn accelerations(g: f64, bodies: &[Body]) -> Vec<NVec> {
    let mut settings = Settings::new();
    for b in bodies {
        settings.add_body(b.clone()).unwrap();
    }
    let mut model = GravityModel::for_bodies(g, settings.bodies());
    let y = flatten(settings.bodies());
    let mut dy = NVec::zeros(y.len());
    model.derivatives(0.0, &y, &mut dy);

    let layout = model.layout();
    (0..layout.bodies)
        .map(|i| NVec::from_column_slice(&dy.as_slice()[layout.velocity_range(i)]))
        .collect()
}

/// Tight solver tolerances for trajectory checks
pub fn tight_solver() -> SolverParams {
    SolverParams {
        abs_tol: 1e-11,
        rel_tol: 1e-11,
        ..SolverParams::default()
    }
}

/// Manual-scheduled simulation over `bodies` with G = 1
pub fn manual_sim(bodies: Vec<Body>, frame_rate: u32, speed: f64) -> Simulation {
    let mut settings = Settings::new()
        .with_frame_rate(frame_rate)
        .with_simulation_speed(speed)
        .with_gravitational_constant(1.0)
        .with_solver(tight_solver());
    for b in bodies {
        settings.add_body(b).unwrap();
    }
    Simulation::with_settings(settings).with_scheduling(Scheduling::Manual)
}

/// Equal-mass binary on a circular orbit about the origin (G = 1)
pub fn symmetric_binary() -> Vec<Body> {
    vec![
        Body::new(&[-1.0, 0.0], &[0.0, -0.5], 1.0).unwrap(),
        Body::new(&[1.0, 0.0], &[0.0, 0.5], 1.0).unwrap(),
    ]
}

// ==================================================================================
// Gravity tests
// ==================================================================================

#[test]
fn gravity_newton_third_law() {
    let bodies = two_body_line(1.0, 2.0, 3.0);
    let acc = accelerations(0.1, &bodies);

    let net = &acc[0] * 2.0 + &acc[1] * 3.0;
    assert!(net.norm() < 1e-12, "Net momentum not zero: {:?}", net);

    // Equal masses: exactly opposite
    let acc = accelerations(0.1, &two_body_line(1.0, 1.0, 1.0));
    assert_eq!(acc[0], -&acc[1]);
}

#[test]
fn gravity_points_toward_other_body() {
    let bodies = two_body_line(2.0, 1.0, 1.0);
    let acc = accelerations(1.0, &bodies);

    let dx = bodies[1].position() - bodies[0].position();
    assert!(acc[0].dot(&dx) > 0.0, "Acceleration is not toward second body");
    assert!(acc[1].dot(&dx) < 0.0, "Acceleration is not toward first body");
}

#[test]
fn gravity_inverse_square_law() {
    let acc_r = accelerations(1.0, &two_body_line(1.0, 1.0, 1.0));
    let acc_2r = accelerations(1.0, &two_body_line(2.0, 1.0, 1.0));

    let ratio = acc_r[0].norm() / acc_2r[0].norm();
    assert_relative_eq!(ratio, 4.0, epsilon = 1e-12);
    // |a| = G m / r^2
    assert_relative_eq!(acc_r[0].norm(), 1.0, epsilon = 1e-12);
}

#[test]
fn gravity_uses_configured_constant() {
    let bodies = two_body_line(2.0, 1.0, 1.0);
    let acc = accelerations(nbsim::GRAVITATIONAL_CONSTANT, &bodies);
    assert_relative_eq!(acc[0][0], nbsim::GRAVITATIONAL_CONSTANT / 4.0, max_relative = 1e-12);
}

#[test]
fn coincident_bodies_exert_no_force() {
    let bodies = vec![
        Body::new(&[1.0, 1.0], &[0.0, 0.0], 1.0).unwrap(),
        Body::new(&[1.0, 1.0], &[0.0, 0.0], 5.0).unwrap(),
    ];
    let acc = accelerations(1.0, &bodies);
    assert_eq!(acc[0].as_slice(), &[0.0, 0.0]);
    assert_eq!(acc[1].as_slice(), &[0.0, 0.0]);

    // A third body still feels both of them
    let mut bodies = bodies;
    bodies.push(Body::new(&[3.0, 1.0], &[0.0, 0.0], 1.0).unwrap());
    let acc = accelerations(1.0, &bodies);
    assert_eq!(acc[0].as_slice(), &[0.25, 0.0]);
    assert_eq!(acc[1].as_slice(), &[0.25, 0.0]);
    assert_relative_eq!(acc[2][0], -6.0 / 4.0, epsilon = 1e-15);
}

// ==================================================================================
// State vector tests
// ==================================================================================

#[test]
fn flatten_then_unflatten_is_exact() {
    let original = vec![
        Body::new(&[0.1, -2.5, 3.0], &[1e-7, 4.0, -0.3], 1.0).unwrap(),
        Body::new(&[1e12, 7.0, -1e-12], &[0.0, 0.0, 9.75], 2.0).unwrap(),
    ];
    let state = flatten(&original);
    assert_eq!(state.len(), 12);
    assert_eq!(&state.as_slice()[0..3], &[0.1, -2.5, 3.0]);
    assert_eq!(&state.as_slice()[9..12], &[0.0, 0.0, 9.75]);

    let mut restored = vec![
        Body::new(&[0.0; 3], &[0.0; 3], 1.0).unwrap(),
        Body::new(&[0.0; 3], &[0.0; 3], 2.0).unwrap(),
    ];
    unflatten(&state, &mut restored).unwrap();
    for (a, b) in original.iter().zip(&restored) {
        assert_eq!(a.position(), b.position());
        assert_eq!(a.velocity(), b.velocity());
    }
}

#[test]
fn unflatten_rejects_wrong_length() {
    let mut bodies = symmetric_binary();
    let short = NVec::zeros(7);
    assert_eq!(
        unflatten(&short, &mut bodies),
        Err(SimError::DimensionMismatch { expected: 8, found: 7 })
    );
}

// ==================================================================================
// Controller tests
// ==================================================================================

#[test]
fn start_without_bodies_stays_inactive() {
    let mut sim = Simulation::with_settings(Settings::new()).with_scheduling(Scheduling::Manual);
    assert_eq!(sim.start(), Err(SimError::NoBodies));
    assert_eq!(sim.state(), SimulationState::Inactive);
}

#[test]
fn second_start_is_rejected() {
    let mut sim = manual_sim(symmetric_binary(), 10, 1.0);
    sim.start().unwrap();
    sim.tick().unwrap();
    let before = sim.state_vector().cloned();

    assert!(matches!(
        sim.start(),
        Err(SimError::InvalidState { operation: "start", state: SimulationState::Active })
    ));
    assert_eq!(sim.state(), SimulationState::Active);
    assert_eq!(sim.state_vector().cloned(), before);
}

#[test]
fn initial_accelerations_are_published() {
    let mut sim = manual_sim(symmetric_binary(), 10, 1.0);
    sim.start().unwrap();

    let bodies = sim.bodies().snapshot();
    assert_relative_eq!(bodies[0].acceleration()[0], 0.25, epsilon = 1e-15);
    assert_relative_eq!(bodies[1].acceleration()[0], -0.25, epsilon = 1e-15);
    assert_eq!(bodies[0].trail().len(), 1);
}

#[test]
fn symmetric_binary_keeps_center_of_mass_fixed() {
    let mut sim = manual_sim(symmetric_binary(), 20, 1.0);
    sim.start().unwrap();
    for _ in 0..200 {
        sim.tick().unwrap().unwrap();
    }

    let bodies = sim.bodies().snapshot();
    let com = nbsim::center_of_mass(&bodies).unwrap();
    assert_abs_diff_eq!(com[0], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(com[1], 0.0, epsilon = 1e-9);

    // Circular orbit: separation stays 2
    let sep = (bodies[1].position() - bodies[0].position()).norm();
    assert_relative_eq!(sep, 2.0, epsilon = 1e-6);
}

#[test]
fn lagrange_triangle_returns_after_one_period() {
    let v = 3.0_f64.powf(-0.25);
    let period = 2.0 * std::f64::consts::PI / v;

    let bodies: Vec<Body> = (0..3)
        .map(|k| {
            let theta = std::f64::consts::FRAC_PI_2 + k as f64 * 2.0 * std::f64::consts::PI / 3.0;
            let (s, c) = theta.sin_cos();
            Body::new(&[c, s], &[-v * s, v * c], 1.0).unwrap()
        })
        .collect();
    let start = flatten(&bodies);

    // 100 ticks of period / 100
    let mut sim = manual_sim(bodies, 100, period);
    sim.start().unwrap();
    for _ in 0..100 {
        sim.tick().unwrap().unwrap();
    }

    assert_relative_eq!(sim.current_time().unwrap(), period, max_relative = 1e-12);
    let end = sim.state_vector().unwrap();
    for (a, b) in start.iter().zip(end.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
}

#[test]
fn trail_is_capped_with_oldest_evicted() {
    // Free body, x = t
    let body = Body::new(&[0.0, 0.0], &[1.0, 0.0], 1.0).unwrap();
    let mut sim = manual_sim(vec![body], 10, 1.0);
    sim.start().unwrap();

    let extra = 10;
    for _ in 0..MAX_TRAIL_SIZE + extra {
        sim.tick().unwrap().unwrap();
    }

    let bodies = sim.bodies().snapshot();
    let trail = bodies[0].trail();
    assert_eq!(trail.len(), MAX_TRAIL_SIZE);
    // Initial point and the first `extra` ticks were evicted
    assert_relative_eq!(trail.oldest().unwrap()[0], 0.1 * (extra + 1) as f64, epsilon = 1e-6);
    assert_relative_eq!(
        trail.latest().unwrap()[0],
        0.1 * (MAX_TRAIL_SIZE + extra) as f64,
        epsilon = 1e-6
    );
}

#[test]
fn skip_ahead_seeds_start_time() {
    let body = Body::new(&[1.0, 2.0], &[0.5, -1.0], 1.0).unwrap();
    let mut settings = Settings::new().with_frame_rate(10).with_skip_ahead(4.0);
    settings.add_body(body).unwrap();
    let mut sim = Simulation::with_settings(settings).with_scheduling(Scheduling::Manual);
    sim.start().unwrap();

    assert_eq!(sim.current_time(), Some(4.0));
    let bodies = sim.bodies().snapshot();
    assert_relative_eq!(bodies[0].position()[0], 3.0, epsilon = 1e-9);
    assert_relative_eq!(bodies[0].position()[1], -2.0, epsilon = 1e-9);
    // Only the starting point is on the trail
    assert_eq!(bodies[0].trail().len(), 1);
}

#[test]
fn stop_publishes_final_state_and_clears_trails() {
    let mut sim = manual_sim(symmetric_binary(), 10, 1.0);
    sim.start().unwrap();
    for _ in 0..5 {
        sim.tick().unwrap();
    }
    let last = sim.state_vector().cloned().unwrap();

    sim.stop().unwrap();
    assert_eq!(sim.state(), SimulationState::Inactive);
    assert_eq!(sim.current_time(), None);

    let bodies = sim.bodies().snapshot();
    assert_eq!(flatten(&bodies), last);
    assert!(bodies.iter().all(|b| b.trail().is_empty()));
    let ids: Vec<BodyId> = bodies.iter().map(Body::id).collect();
    assert_eq!(ids, vec![BodyId(0), BodyId(1)]);

    // A new run starts from the configured initial state
    sim.start().unwrap();
    assert_eq!(sim.current_time(), Some(0.0));
    assert_eq!(sim.state_vector().cloned().unwrap(), flatten(&symmetric_binary()));
}

#[test]
fn pause_keeps_state_and_resume_continues() {
    let mut sim = manual_sim(symmetric_binary(), 10, 1.0);
    sim.start().unwrap();
    sim.tick().unwrap();
    sim.pause().unwrap();
    assert_eq!(sim.state(), SimulationState::Paused);
    let paused_at = sim.current_time().unwrap();

    sim.start().unwrap();
    assert_eq!(sim.state(), SimulationState::Active);
    assert_eq!(sim.current_time(), Some(paused_at));
    let frame = sim.tick().unwrap().unwrap();
    assert_eq!(frame.tick, 2);
}

#[test]
fn divergence_halts_to_inactive() {
    // Head-on fall from rest: the solver cannot get through the collision
    let bodies = vec![
        Body::new(&[-1.0, 0.0], &[0.0, 0.0], 1.0).unwrap(),
        Body::new(&[1.0, 0.0], &[0.0, 0.0], 1.0).unwrap(),
    ];
    let mut settings = Settings::new()
        .with_frame_rate(2)
        .with_simulation_speed(1.0)
        .with_gravitational_constant(1.0)
        .with_solver(SolverParams {
            min_step: 1e-3,
            abs_tol: 1e-8,
            rel_tol: 1e-8,
            ..SolverParams::default()
        });
    for b in bodies {
        settings.add_body(b).unwrap();
    }
    let (tx, rx) = mpsc::channel();
    let mut sim = Simulation::with_settings(settings)
        .with_scheduling(Scheduling::Manual)
        .with_sink(tx);
    sim.start().unwrap();

    let mut halted = false;
    for _ in 0..20 {
        if sim.tick().unwrap().is_none() {
            halted = true;
            break;
        }
    }
    assert!(halted, "solver never gave up");
    assert_eq!(sim.state(), SimulationState::Inactive);
    assert!(matches!(sim.tick(), Err(SimError::InvalidState { .. })));

    // Collision is at t ~ 2.22, so at least four half-second ticks went through
    let frames: Vec<_> = rx.try_iter().collect();
    assert!(frames.len() >= 4);

    let bodies = sim.bodies().snapshot();
    assert!(bodies.iter().all(|b| b.trail().is_empty()));
    assert!(bodies.iter().all(|b| b.position().iter().all(|x| x.is_finite())));
    assert!(bodies[0].position()[0] < 0.0 && bodies[0].position()[0] > -1.0);
}

// ==================================================================================
// Scenario file tests
// ==================================================================================

#[test]
fn bundled_scenarios_load() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    for name in ["earth_moon.yaml", "lagrange_triangle.yaml"] {
        let cfg = ScenarioConfig::from_path(&dir.join(name)).unwrap();
        let settings = cfg.to_settings().unwrap();
        assert!(settings.validate().is_ok(), "{name} does not validate");
    }
}

#[test]
fn earth_moon_scenario_has_momentum_near_zero() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios/earth_moon.yaml");
    let settings = ScenarioConfig::from_path(&path).unwrap().to_settings().unwrap();

    let com = settings.center_of_mass().unwrap();
    assert_abs_diff_eq!(com[0], 0.0, epsilon = 1.0);
    let momentum: f64 = settings.bodies().iter().map(|b| b.mass() * b.velocity()[1]).sum();
    assert_abs_diff_eq!(momentum, 0.0, epsilon = 1e-4);
}
