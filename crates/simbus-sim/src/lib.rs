//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Simulation component runtime for the SimBus platform."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! A simulation component is a [`SimulationComponent`] driven by a
//! [`ComponentEngine`]. The engine subscribes to the simulation state and
//! epoch topics, waits until the component reports that its inputs for the
//! current epoch are complete, runs the processing hook and answers each
//! epoch with exactly one ready status.
pub mod component;
pub mod engine;
pub mod timer;

pub use component::{EpochContext, PassiveComponent, SimulationComponent};
pub use engine::{ComponentEngine, EngineState};
pub use timer::{Timer, TimerHandle};

use simbus_bus::BusError;
use simbus_msg::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("status message could not be built: {0}")]
    Validation(#[from] ValidationError),
    #[error("component engine has been stopped")]
    Stopped,
}
