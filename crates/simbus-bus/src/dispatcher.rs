//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Decode deliveries and hand them to message handlers."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use simbus_msg::{JsonMap, Message, Parsed, Registry, ValidationError};
use tracing::{debug, error, info, warn};

use crate::logging::{log_delivery, BusMetricsExporter, DeliveryDirection};
use crate::stats::{BusStats, Counters};
use crate::transport::Delivery;

/// Longest payload excerpt written to the failure logs, in characters.
const PAYLOAD_PREVIEW_CHARS: usize = 256;

/// A delivery after decoding.
#[derive(Debug)]
pub enum Inbound {
    /// Registered type that passed validation.
    Message(Message),
    /// JSON object of an unregistered or missing type.
    Untyped(JsonMap),
    /// Payload that failed to decode or validate.
    Rejected(ValidationError),
}

impl Inbound {
    pub fn decode(registry: &Registry, payload: &[u8]) -> Self {
        match registry.parse(payload) {
            Ok(Parsed::Message(message)) => Inbound::Message(message),
            Ok(Parsed::Untyped(attributes)) => Inbound::Untyped(attributes),
            Err(error) => Inbound::Rejected(error),
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Inbound::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Inbound::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Message(message) => message.kind(),
            Inbound::Untyped(_) => "untyped",
            Inbound::Rejected(_) => "rejected",
        }
    }
}

/// Receiver of decoded deliveries.
///
/// Errors and panics are logged and counted by the dispatcher; they never
/// stop the subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, inbound: Inbound, topic: String) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Inbound, String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, inbound: Inbound, topic: String) -> anyhow::Result<()> {
        self(inbound, topic).await
    }
}

/// Decodes deliveries of one subscription and invokes its handler.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    handler: Arc<dyn MessageHandler>,
    counters: Arc<Counters>,
    metrics: Option<Arc<BusMetricsExporter>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_counters(registry, handler, Arc::default(), None)
    }

    pub(crate) fn with_counters(
        registry: Arc<Registry>,
        handler: Arc<dyn MessageHandler>,
        counters: Arc<Counters>,
        metrics: Option<Arc<BusMetricsExporter>>,
    ) -> Self {
        Self {
            registry,
            handler,
            counters,
            metrics,
        }
    }

    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }

    /// Decode one delivery and run the handler to completion.
    ///
    /// Returns `false` when the handler failed or panicked.
    pub async fn dispatch(&self, delivery: Delivery) -> bool {
        log_delivery(
            DeliveryDirection::Inbound,
            &delivery.routing_key,
            delivery.payload.len(),
        );
        let inbound = Inbound::decode(&self.registry, &delivery.payload);
        log_received(&delivery.routing_key, &inbound);

        self.counters.delivered();
        if let Some(metrics) = &self.metrics {
            metrics.observe_delivered();
        }

        let Delivery {
            routing_key: topic,
            payload,
        } = delivery;
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(inbound, topic.clone()))
            .catch_unwind()
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_handler_latency(started.elapsed());
        }

        let failure = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(err)) => {
                warn!(
                    topic = %topic,
                    payload = %payload_preview(&payload),
                    error = %format!("{err:#}"),
                    "message handler failed"
                );
                err.to_string()
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(
                    topic = %topic,
                    payload = %payload_preview(&payload),
                    panic = %reason,
                    "message handler panicked"
                );
                reason
            }
        };
        debug!(topic = %topic, failure = %failure, "delivery handled with failure");
        self.counters.handler_failed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_handler_failure();
        }
        false
    }
}

fn log_received(topic: &str, inbound: &Inbound) {
    match inbound {
        Inbound::Message(Message::SimulationState(message)) => info!(
            topic = %topic,
            message_id = %message.header().message_id(),
            state = ?message.simulation_state(),
            "received simulation state"
        ),
        Inbound::Message(Message::Epoch(message)) => info!(
            topic = %topic,
            message_id = %message.header().message_id(),
            epoch = message.epoch_number(),
            "received epoch"
        ),
        Inbound::Message(Message::Status(message)) => debug!(
            topic = %topic,
            source = %message.header().source_process_id(),
            epoch = message.epoch_number(),
            value = ?message.value(),
            "received status"
        ),
        Inbound::Message(message) => debug!(
            topic = %topic,
            message_id = %message.message_id(),
            kind = message.kind(),
            epoch = ?message.epoch_number(),
            "received message"
        ),
        Inbound::Untyped(attributes) => debug!(
            topic = %topic,
            message_type = ?attributes.get("Type"),
            "received message of an unregistered type"
        ),
        Inbound::Rejected(error) => warn!(
            topic = %topic,
            error = %error,
            "received invalid message"
        ),
    }
}

/// Lossy UTF-8 rendering of a payload, cut at [`PAYLOAD_PREVIEW_CHARS`].
fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut chars = text.chars();
    let mut preview: String = chars.by_ref().take(PAYLOAD_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        preview.push_str("...");
    }
    preview
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn delivery(routing_key: &str, payload: &'static [u8]) -> Delivery {
        Delivery {
            routing_key: routing_key.to_owned(),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn classifies_payloads() {
        let seen: Arc<Mutex<Vec<(&'static str, String)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let handler = move |inbound: Inbound, topic: String| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push((inbound.kind(), topic));
                Ok::<(), anyhow::Error>(())
            }
        };
        let dispatcher = Dispatcher::new(Arc::new(Registry::standard()), Arc::new(handler));

        assert!(dispatcher.dispatch(delivery("a", b"not json")).await);
        assert!(dispatcher.dispatch(delivery("b", br#"{"Type": "Custom"}"#)).await);
        assert!(
            dispatcher
                .dispatch(delivery(
                    "SimState",
                    br#"{"Type": "SimState", "SimulationId": "sim1", "SourceProcessId": "m",
                         "MessageId": "m-1", "Timestamp": "2024-01-01T00:00:00Z",
                         "SimulationState": "running"}"#,
                ))
                .await
        );

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("rejected", "a".to_owned()),
                ("untyped", "b".to_owned()),
                ("state", "SimState".to_owned()),
            ]
        );
        assert_eq!(dispatcher.stats().delivered, 3);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        let handler = |_inbound: Inbound, topic: String| async move {
            if topic == "panic" {
                panic!("handler blew up");
            }
            Err::<(), _>(anyhow::anyhow!("handler refused {topic}"))
        };
        let dispatcher = Dispatcher::new(Arc::new(Registry::standard()), Arc::new(handler));

        assert!(!dispatcher.dispatch(delivery("error", b"{}")).await);
        assert!(!dispatcher.dispatch(delivery("panic", b"{}")).await);
        assert!(!dispatcher.dispatch(delivery("error", b"\xff\xfe{\"Type\"")).await);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.handler_failures, 3);
    }

    #[test]
    fn failure_logs_carry_a_bounded_payload_excerpt() {
        assert_eq!(payload_preview(br#"{"Type":"Status"}"#), r#"{"Type":"Status"}"#);
        assert_eq!(payload_preview(b"\xffok"), "\u{fffd}ok");

        let long = vec![b'a'; PAYLOAD_PREVIEW_CHARS + 10];
        let preview = payload_preview(&long);
        assert_eq!(preview.len(), PAYLOAD_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }
}
