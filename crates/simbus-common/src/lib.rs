//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Shared primitives and utilities for the SimBus runtime."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! Core shared primitives for the SimBus workspace.
//! This crate exposes configuration loading, logging initialisation and the
//! UTC time helpers consumed by the message schema and the component engine.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{AppConfig, BusConfig, ComponentConfig, LoggingConfig, TopicConfig};
pub use logging::{init_tracing, LogFormat};
pub use time::{Clock, FixedClock, SharedClock, SystemClock};
