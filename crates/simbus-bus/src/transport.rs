//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Broker transport abstraction used by the bus client."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use simbus_common::BusConfig;
use tokio::sync::mpsc;

use crate::Result;

/// One message as received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Bytes,
}

/// Deliveries of one subscription, in broker order.
pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

/// Declaration parameters of a topic exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl From<&BusConfig> for ExchangeSpec {
    fn from(config: &BusConfig) -> Self {
        Self {
            name: config.exchange.clone(),
            durable: config.exchange_durable,
            auto_delete: config.exchange_autodelete,
        }
    }
}

/// An open broker connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declare a topic exchange, failing when it exists with other flags.
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()>;
    /// Create one exclusive queue bound to every pattern.
    async fn subscribe(&self, exchange: &str, patterns: &[String]) -> Result<DeliveryStream>;
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()>;
    /// Close the connection. The queues it owns are removed.
    async fn close(&self) -> Result<()>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// Opens transports for a bus configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn Transport>>;
}
