//! Numerical and physical parameters for the simulation
//!
//! `SolverParams` holds the adaptive solver's runtime settings:
//! - step size bounds (`min_step`, `max_step`) and an optional first step,
//! - absolute and relative error tolerances.

/// Gravitational constant in km^3 * earthmass^-1 * s^-2
pub const GRAVITATIONAL_CONSTANT: f64 = 398575.0725;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    pub min_step: f64, // smallest step magnitude before giving up
    pub max_step: f64, // largest step magnitude
    pub abs_tol: f64, // absolute error tolerance
    pub rel_tol: f64, // relative error tolerance
    pub initial_step: Option<f64>, // first trial step, defaults to the whole interval
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            min_step: 1.0e-10,
            max_step: 1.0e4,
            abs_tol: 0.01,
            rel_tol: 1.0e-4,
            initial_step: None,
        }
    }
}
