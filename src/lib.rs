pub mod simulation;
pub mod configuration;
pub mod visualization;

pub use simulation::states::{center_of_mass, flatten, unflatten, Body, BodyId, NVec, Rgba, SharedBodies, StateLayout, Trail, MAX_TRAIL_SIZE};
pub use simulation::forces::{AccelerationSnapshot, GravityModel};
pub use simulation::integrator::{DormandPrince54, OdeSolver, OdeSystem, SolverStats};
pub use simulation::params::{SolverParams, GRAVITATIONAL_CONSTANT};
pub use simulation::settings::{DisplayFlags, Settings};
pub use simulation::clock::{Clock, FramePacer, ManualClock, SystemClock};
pub use simulation::controller::{Frame, FrameSink, NullSink, Scheduling, Simulation, SimulationState};
pub use simulation::error::{IntegrationError, SimError};

pub use configuration::config::{BodyConfig, DisplayConfig, IntegratorConfig, RunConfig, ScenarioConfig};

pub use visualization::viewer2d::run_2d;
