pub mod config;
pub mod error;
pub mod hash;
pub mod rng;
pub mod types;

pub use config::SimulationConfig;
pub use error::{Result, SimError};
