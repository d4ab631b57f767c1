pub mod states;
pub mod params;
pub mod settings;
pub mod error;
pub mod forces;
pub mod integrator;
pub mod clock;
pub mod controller;
