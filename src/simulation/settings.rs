//! Run configuration: bodies, pacing, solver and display options
//!
//! `Settings` is filled in before a run and handed to the
//! [`Simulation`](super::controller::Simulation); the controller never
//! mutates it while a run is active.

use std::time::Duration;

use super::error::SimError;
use super::params::{SolverParams, GRAVITATIONAL_CONSTANT};
use super::states::{self, Body, BodyId, NVec, Rgba};

/// What the renderer should draw besides the bodies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayFlags {
    pub show_trail: bool,
    pub show_grid: bool,
    pub show_center_of_mass: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    bodies: Vec<Body>,
    frame_rate: u32, // ticks per wall-clock second
    simulation_speed: f64, // simulated time per wall-clock second
    skip_ahead: f64, // simulated time at which a run starts
    gravitational_constant: f64,
    solver: SolverParams,
    display: DisplayFlags,
    background: Rgba,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bodies: Vec::new(),
            frame_rate: 60,
            simulation_speed: 1.0,
            skip_ahead: 0.0,
            gravitational_constant: GRAVITATIONAL_CONSTANT,
            solver: SolverParams::default(),
            display: DisplayFlags::default(),
            background: Rgba::BLACK,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_simulation_speed(mut self, speed: f64) -> Self {
        self.simulation_speed = speed;
        self
    }

    pub fn with_skip_ahead(mut self, skip_ahead: f64) -> Self {
        self.skip_ahead = skip_ahead;
        self
    }

    pub fn with_gravitational_constant(mut self, g: f64) -> Self {
        self.gravitational_constant = g;
        self
    }

    pub fn with_solver(mut self, solver: SolverParams) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_display(mut self, display: DisplayFlags) -> Self {
        self.display = display;
        self
    }

    pub fn with_background(mut self, background: Rgba) -> Self {
        self.background = background;
        self
    }

    /// Append a body, stamping it with the next id.
    ///
    /// Fails if its dimensionality differs from the bodies already present.
    pub fn add_body(&mut self, mut body: Body) -> Result<BodyId, SimError> {
        if let Some(expected) = self.dimensions() {
            if body.dimensions() != expected {
                return Err(SimError::MixedDimensions {
                    expected,
                    found: body.dimensions(),
                });
            }
        }
        let id = BodyId(self.bodies.len());
        body.set_id(id);
        body.clear_trail();
        self.bodies.push(body);
        Ok(id)
    }

    /// Remove a body; later bodies shift down and are renumbered
    pub fn remove_body(&mut self, id: BodyId) -> Option<Body> {
        if id.index() >= self.bodies.len() {
            return None;
        }
        let removed = self.bodies.remove(id.index());
        for (i, body) in self.bodies.iter_mut().enumerate().skip(id.index()) {
            body.set_id(BodyId(i));
        }
        Some(removed)
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn simulation_speed(&self) -> f64 {
        self.simulation_speed
    }

    pub fn skip_ahead(&self) -> f64 {
        self.skip_ahead
    }

    pub fn gravitational_constant(&self) -> f64 {
        self.gravitational_constant
    }

    pub fn solver(&self) -> &SolverParams {
        &self.solver
    }

    pub fn display(&self) -> DisplayFlags {
        self.display
    }

    pub fn background(&self) -> Rgba {
        self.background
    }

    pub fn masses(&self) -> Vec<f64> {
        self.bodies.iter().map(Body::mass).collect()
    }

    /// Shared dimensionality of the bodies, `None` when there are none
    pub fn dimensions(&self) -> Option<usize> {
        self.bodies.first().map(Body::dimensions)
    }

    pub fn total_mass(&self) -> f64 {
        self.bodies.iter().map(Body::mass).sum()
    }

    pub fn avg_mass(&self) -> f64 {
        if self.bodies.is_empty() {
            return 0.0;
        }
        self.total_mass() / self.bodies.len() as f64
    }

    pub fn center_of_mass(&self) -> Option<NVec> {
        states::center_of_mass(&self.bodies)
    }

    pub fn flattened_state(&self) -> NVec {
        states::flatten(&self.bodies)
    }

    /// Simulated time covered by one tick
    pub fn tick_duration(&self) -> f64 {
        self.simulation_speed / f64::from(self.frame_rate)
    }

    /// Wall-clock budget of one tick
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Everything `start()` needs before it touches any state
    pub fn validate(&self) -> Result<(), SimError> {
        let expected = self.dimensions().ok_or(SimError::NoBodies)?;
        if let Some(b) = self.bodies.iter().find(|b| b.dimensions() != expected) {
            return Err(SimError::MixedDimensions {
                expected,
                found: b.dimensions(),
            });
        }
        if self.frame_rate == 0 {
            return Err(SimError::InvalidFrameRate(self.frame_rate));
        }
        if !self.simulation_speed.is_finite() {
            return Err(SimError::InvalidParameter("simulation_speed", self.simulation_speed));
        }
        if !self.skip_ahead.is_finite() {
            return Err(SimError::InvalidParameter("skip_ahead", self.skip_ahead));
        }
        if !(self.gravitational_constant.is_finite() && self.gravitational_constant > 0.0) {
            return Err(SimError::InvalidParameter(
                "gravitational_constant",
                self.gravitational_constant,
            ));
        }
        let s = &self.solver;
        if !(s.min_step > 0.0 && s.max_step >= s.min_step) {
            return Err(SimError::InvalidParameter("min_step", s.min_step));
        }
        if !(s.abs_tol >= 0.0 && s.rel_tol >= 0.0 && s.abs_tol + s.rel_tol > 0.0) {
            return Err(SimError::InvalidParameter("abs_tol", s.abs_tol));
        }
        Ok(())
    }
}
