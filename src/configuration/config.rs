//! Configuration types for loading simulation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! scenario. A scenario consists of:
//!
//! - [`RunConfig`]        – pacing and physics (frame rate, speed, skip-ahead, G)
//! - [`DisplayConfig`]    – renderer flags, background color and scale
//! - [`IntegratorConfig`] – adaptive solver step bounds and tolerances
//! - [`BodyConfig`]       – initial state for each body
//! - [`ScenarioConfig`]   – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//!
//! ```yaml
//! simulation:
//!   frame_rate: 60            # ticks per wall-clock second
//!   simulation_speed: 86400.0 # simulated seconds per wall-clock second
//!   skip_ahead: 0.0           # simulated time at start
//!   gravitational_constant: 398575.0725
//!
//! display:
//!   show_trail: true
//!   show_grid: false
//!   show_center_of_mass: true
//!   background: [0.0, 0.0, 0.0]
//!   scale: 0.001              # pixels per length unit
//!
//! integrator:
//!   min_step: 1.0e-10
//!   max_step: 1.0e4
//!   abs_tol: 0.01
//!   rel_tol: 1.0e-4
//!
//! bodies:
//!   - x: [ -4670.0, 0.0 ]
//!     v: [ 0.0, -0.0125 ]
//!     m: 1.0
//!     color: [0.2, 0.4, 1.0]
//!   - x: [ 379730.0, 0.0 ]
//!     v: [ 0.0, 1.012 ]
//!     m: 0.0123
//!     color: [0.8, 0.8, 0.8]
//! ```
//!
//! Every section except `simulation.frame_rate`, `simulation.simulation_speed`
//! and `bodies` is optional.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::simulation::error::SimError;
use crate::simulation::params::{SolverParams, GRAVITATIONAL_CONSTANT};
use crate::simulation::settings::{DisplayFlags, Settings};
use crate::simulation::states::{Body, Rgba};

/// Pacing and physical constants
#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub frame_rate: u32, // ticks per wall-clock second
    pub simulation_speed: f64, // simulated time per wall-clock second
    #[serde(default)]
    pub skip_ahead: f64, // simulated time the run starts at
    #[serde(default = "default_g")]
    pub gravitational_constant: f64,
}

fn default_g() -> f64 {
    GRAVITATIONAL_CONSTANT
}

/// What the viewer draws and how large
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_trail: bool,
    pub show_grid: bool,
    pub show_center_of_mass: bool,
    pub background: Vec<f32>, // [r, g, b] or [r, g, b, a] in 0..1
    pub scale: f32, // pixels per simulation length unit
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_trail: true,
            show_grid: false,
            show_center_of_mass: false,
            background: vec![0.0, 0.0, 0.0],
            scale: 1.0,
        }
    }
}

impl DisplayConfig {
    pub fn flags(&self) -> DisplayFlags {
        DisplayFlags {
            show_trail: self.show_trail,
            show_grid: self.show_grid,
            show_center_of_mass: self.show_center_of_mass,
        }
    }
}

/// Adaptive solver settings; defaults match [`SolverParams::default`]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IntegratorConfig {
    pub min_step: f64,
    pub max_step: f64,
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub initial_step: Option<f64>,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        let p = SolverParams::default();
        Self {
            min_step: p.min_step,
            max_step: p.max_step,
            abs_tol: p.abs_tol,
            rel_tol: p.rel_tol,
            initial_step: p.initial_step,
        }
    }
}

impl From<&IntegratorConfig> for SolverParams {
    fn from(cfg: &IntegratorConfig) -> Self {
        SolverParams {
            min_step: cfg.min_step,
            max_step: cfg.max_step,
            abs_tol: cfg.abs_tol,
            rel_tol: cfg.rel_tol,
            initial_step: cfg.initial_step,
        }
    }
}

/// Configuration for a single body's initial state
#[derive(Deserialize, Debug, Clone)]
pub struct BodyConfig {
    pub x: Vec<f64>, // initial position, 2 or 3 components
    pub v: Vec<f64>, // initial velocity, same length as `x`
    pub m: f64, // mass
    #[serde(default)]
    pub color: Option<Vec<f32>>, // [r, g, b] or [r, g, b, a], white if omitted
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub simulation: RunConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub integrator: IntegratorConfig,
    pub bodies: Vec<BodyConfig>,
}

impl ScenarioConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("failed to parse scenario YAML")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open scenario {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    /// Build runtime settings, validating every body on the way
    pub fn to_settings(&self) -> Result<Settings, SimError> {
        let background = parse_color(&self.display.background)?.unwrap_or(Rgba::BLACK);
        let mut settings = Settings::new()
            .with_frame_rate(self.simulation.frame_rate)
            .with_simulation_speed(self.simulation.simulation_speed)
            .with_skip_ahead(self.simulation.skip_ahead)
            .with_gravitational_constant(self.simulation.gravitational_constant)
            .with_solver(SolverParams::from(&self.integrator))
            .with_display(self.display.flags())
            .with_background(background);

        for bc in &self.bodies {
            let color = match &bc.color {
                Some(c) => parse_color(c)?.unwrap_or_default(),
                None => Rgba::default(),
            };
            let body = Body::new(&bc.x, &bc.v, bc.m)?.with_color(color);
            settings.add_body(body)?;
        }
        Ok(settings)
    }
}

/// `[r, g, b]` or `[r, g, b, a]`; an empty list means "not set"
fn parse_color(components: &[f32]) -> Result<Option<Rgba>, SimError> {
    match components {
        [] => Ok(None),
        [r, g, b] => Ok(Some(Rgba::rgb(*r, *g, *b))),
        [r, g, b, a] => Ok(Some(Rgba::new(*r, *g, *b, *a))),
        other => Err(SimError::DimensionMismatch {
            expected: 4,
            found: other.len(),
        }),
    }
}
