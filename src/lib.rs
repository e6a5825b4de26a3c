//! hireloop: discovers job postings, ranks them against weighted preferences
//! and submits a bounded, human-paced number of applications per day.

pub mod actuator;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod scheduler;
pub mod state_machine;
pub mod store;

#[cfg(test)]
mod testing;

pub use actuator::{Actuator, ActuatorError, HttpActuator};
pub use config::Config;
pub use controller::{ControlResponse, RunController, RunPhase, RunReport, RunStatus};
pub use error::{HireloopError, Result};
pub use store::{DataKind, PersistentStore};
