//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Topic exchange bus client and message dispatch."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! Publish/subscribe client for a topic exchange.
//!
//! [`BusClient`] owns one broker connection obtained from a [`Connector`],
//! publishes encoded messages and runs one consumer task per subscription.
//! Every delivery is decoded through the message [`Registry`](simbus_msg::Registry)
//! and handed to a [`MessageHandler`] by the [`Dispatcher`].
pub mod client;
pub mod dispatcher;
pub mod logging;
pub mod memory;
pub mod stats;
pub mod topic;
pub mod transport;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use client::BusClient;
pub use dispatcher::{Dispatcher, Inbound, MessageHandler};
pub use logging::{log_delivery, BusMetricsExporter, DeliveryDirection};
pub use memory::MemoryBroker;
pub use stats::BusStats;
pub use transport::{Connector, Delivery, DeliveryStream, ExchangeSpec, Transport};

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;

use simbus_msg::ValidationError;

/// Result alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced by the bus client and its transports.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to the message bus: {0}")]
    Connection(String),
    #[error("failed to publish on topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },
    #[error("bus client is closed")]
    Closed,
    #[error("bus client is not open")]
    NotOpen,
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
