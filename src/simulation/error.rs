//! Error types for configuration, lifecycle and numerical failures

use std::fmt;

use super::controller::SimulationState;

/// Failure reported by the adaptive solver while advancing the state vector
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrationError {
    /// The step controller needed a step smaller than `min_step` to meet the
    /// tolerances (singular or near-collision trajectory)
    StepSizeUnderflow {
        time: f64,
        step: f64,
        min_step: f64,
    },
    /// A stage produced a non-finite value
    NumericOverflow {
        time: f64,
    },
}

impl fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationError::StepSizeUnderflow { time, step, min_step } => write!(
                f,
                "step size {step:e} fell below the minimum {min_step:e} at t = {time}"
            ),
            IntegrationError::NumericOverflow { time } => {
                write!(f, "state vector overflowed at t = {time}")
            }
        }
    }
}

impl std::error::Error for IntegrationError {}

/// Errors surfaced by bodies, settings and the simulation controller
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// `start()` before any settings were supplied
    NotConfigured,
    /// `start()` with an empty body list
    NoBodies,
    /// Frame rate must be positive
    InvalidFrameRate(u32),
    /// A numeric setting is out of range (name, value)
    InvalidParameter(&'static str, f64),
    /// A body's dimensionality differs from the rest of the simulation
    MixedDimensions {
        expected: usize,
        found: usize,
    },
    /// Operation not allowed from the current lifecycle state
    InvalidState {
        operation: &'static str,
        state: SimulationState,
    },
    /// Vector length does not match the body's dimensionality
    DimensionMismatch {
        expected: usize,
        found: usize,
    },
    /// Only 2D and 3D bodies are supported
    UnsupportedDimension(usize),
    /// Mass must be positive and finite
    InvalidMass(f64),
    /// The solver failed while seeding or advancing a run
    Integration(IntegrationError),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::NotConfigured => write!(f, "simulation not configured"),
            SimError::NoBodies => write!(f, "simulation has no bodies"),
            SimError::InvalidFrameRate(rate) => {
                write!(f, "frame rate must be positive, got {rate}")
            }
            SimError::InvalidParameter(name, value) => {
                write!(f, "invalid value {value} for `{name}`")
            }
            SimError::MixedDimensions { expected, found } => write!(
                f,
                "body has {found} dimensions but the simulation uses {expected}"
            ),
            SimError::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while {state}")
            }
            SimError::DimensionMismatch { expected, found } => write!(
                f,
                "vector length does not match required length => {found} != {expected}"
            ),
            SimError::UnsupportedDimension(d) => write!(
                f,
                "invalid number of dimensions '{d}', only 2 or 3 are supported"
            ),
            SimError::InvalidMass(m) => write!(f, "mass must be positive and finite, got {m}"),
            SimError::Integration(err) => write!(f, "integration failed: {err}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Integration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IntegrationError> for SimError {
    fn from(err: IntegrationError) -> Self {
        SimError::Integration(err)
    }
}
