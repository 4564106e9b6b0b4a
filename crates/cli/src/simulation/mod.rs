//! Workload simulation against the in-process mock API.

mod driver;
mod stats;
mod workload;

pub use driver::{Simulation, SimulationConfig};
pub use stats::SimulationStats;
pub use workload::Workload;
