//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Structured delivery logging and prometheus bus metrics."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

/// Direction of a delivery relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDirection {
    Outbound,
    Inbound,
}

/// Emit a structured log entry for bus traffic.
pub fn log_delivery(direction: DeliveryDirection, routing_key: &str, payload_len: usize) {
    debug!(
        topic = %routing_key,
        bytes = payload_len,
        direction = ?direction,
        "bus activity"
    );
}

/// Prometheus metric handles for bus activity.
pub struct BusMetricsExporter {
    published: IntCounter,
    delivered: IntCounter,
    dropped: IntCounter,
    handler_failures: IntCounter,
    handler_latency: Histogram,
}

impl BusMetricsExporter {
    /// Register bus metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "simbus_messages_published_total",
            "Messages published to the bus exchange",
        ))?;
        let delivered = IntCounter::with_opts(Opts::new(
            "simbus_messages_delivered_total",
            "Deliveries handed to message handlers",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "simbus_messages_dropped_total",
            "Deliveries discarded or publishes refused",
        ))?;
        let handler_failures = IntCounter::with_opts(Opts::new(
            "simbus_handler_failures_total",
            "Message handler invocations that failed or panicked",
        ))?;
        let handler_latency = Histogram::with_opts(HistogramOpts::new(
            "simbus_handler_latency_seconds",
            "Time spent inside message handlers",
        ))?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(delivered.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(handler_latency.clone()))?;

        Ok(Self {
            published,
            delivered,
            dropped,
            handler_failures,
            handler_latency,
        })
    }

    pub fn observe_published(&self) {
        self.published.inc();
    }

    pub fn observe_delivered(&self) {
        self.delivered.inc();
    }

    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }

    pub fn observe_handler_failure(&self) {
        self.handler_failures.inc();
    }

    pub fn observe_handler_latency(&self, duration: Duration) {
        self.handler_latency.observe(duration.as_secs_f64());
    }
}

impl std::fmt::Debug for BusMetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMetricsExporter")
            .field("published", &self.published.get())
            .field("delivered", &self.delivered.get())
            .finish_non_exhaustive()
    }
}
