//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Bus client: connection lifecycle, publishing and subscriptions."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use simbus_common::BusConfig;
use simbus_msg::{Message, Registry};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::logging::{log_delivery, BusMetricsExporter, DeliveryDirection};
use crate::stats::{BusStats, Counters};
use crate::topic;
use crate::transport::{Connector, DeliveryStream, ExchangeSpec, Transport};
use crate::{BusError, Result};

enum Connection {
    Idle,
    Open(Arc<dyn Transport>),
    Closed,
}

struct ClientInner {
    config: BusConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<Registry>,
    connection: AsyncMutex<Connection>,
    open: AtomicBool,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    listened: Mutex<Vec<String>>,
    counters: Arc<Counters>,
    metrics: OnceCell<Arc<BusMetricsExporter>>,
}

/// Handle to one bus connection. Clones share the connection.
///
/// The client is single use: once closed it cannot be reopened.
#[derive(Clone)]
pub struct BusClient {
    inner: Arc<ClientInner>,
}

impl BusClient {
    pub fn new(config: BusConfig, connector: Arc<dyn Connector>, registry: Arc<Registry>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                registry,
                connection: AsyncMutex::new(Connection::Idle),
                open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown,
                listened: Mutex::new(Vec::new()),
                counters: Arc::default(),
                metrics: OnceCell::new(),
            }),
        }
    }

    /// Report activity to prometheus in addition to [`BusClient::stats`].
    pub fn with_metrics(self, metrics: Arc<BusMetricsExporter>) -> Self {
        if self.inner.metrics.set(metrics).is_err() {
            warn!("bus metrics exporter already attached");
        }
        self
    }

    /// Connect and declare the configured exchange. Repeated calls are no-ops.
    pub async fn open(&self) -> Result<()> {
        let mut connection = self.inner.connection.lock().await;
        match &*connection {
            Connection::Open(_) => return Ok(()),
            Connection::Closed => return Err(BusError::Closed),
            Connection::Idle => {}
        }

        let config = &self.inner.config;
        if config.ssl {
            debug!(ssl_version = %config.ssl_version, "using TLS for the bus connection");
        }
        let transport = tokio::time::timeout(
            config.connect_timeout,
            self.inner.connector.connect(config),
        )
        .await
        .map_err(|_| {
            BusError::Connection(format!(
                "timed out after {:?} connecting to {}:{}",
                config.connect_timeout, config.host, config.port
            ))
        })??;

        let exchange = ExchangeSpec::from(config);
        if let Err(err) = transport.declare_exchange(&exchange).await {
            if let Err(close_err) = transport.close().await {
                debug!(error = %close_err, "failed to close rejected connection");
            }
            return Err(BusError::Connection(format!(
                "failed to declare exchange '{}': {err}",
                exchange.name
            )));
        }

        info!(
            host = %config.host,
            port = config.port,
            exchange = %exchange.name,
            transport = transport.name(),
            "bus connection opened"
        );
        *connection = Connection::Open(transport);
        self.inner.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Bind one new queue to `patterns` and start delivering to `handler`.
    ///
    /// Deliveries of one subscription are handled one at a time in broker order.
    pub async fn subscribe<H>(&self, patterns: &[String], handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        self.subscribe_shared(patterns, Arc::new(handler)).await
    }

    pub async fn subscribe_shared(
        &self,
        patterns: &[String],
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        for pattern in patterns {
            topic::validate_pattern(pattern)?;
        }
        let transport = self.transport().await?;
        let stream = transport
            .subscribe(&self.inner.config.exchange, patterns)
            .await?;
        {
            let mut listened = self.inner.listened.lock();
            for pattern in patterns {
                if !listened.contains(pattern) {
                    listened.push(pattern.clone());
                }
            }
        }

        let dispatcher = Dispatcher::with_counters(
            Arc::clone(&self.inner.registry),
            handler,
            Arc::clone(&self.inner.counters),
            self.inner.metrics.get().cloned(),
        );
        let shutdown = self.inner.shutdown.subscribe();
        let counters = Arc::clone(&self.inner.counters);
        let metrics = self.inner.metrics.get().cloned();
        let label = patterns.join(",");
        info!(patterns = %label, "subscribed to topics");
        tokio::spawn(consume(stream, dispatcher, shutdown, counters, metrics, label));
        Ok(())
    }

    /// Publish raw bytes on a concrete topic.
    ///
    /// Fails with [`BusError::Publish`] before [`BusClient::open`] and with
    /// [`BusError::Closed`] after [`BusClient::close`].
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        topic::validate_routing_key(topic)?;
        let transport = match self.transport().await {
            Err(BusError::NotOpen) => {
                return Err(BusError::Publish {
                    topic: topic.to_owned(),
                    reason: BusError::NotOpen.to_string(),
                })
            }
            other => other?,
        };
        let payload = payload.into();
        let len = payload.len();
        if let Err(err) = transport
            .publish(&self.inner.config.exchange, topic, payload)
            .await
        {
            self.inner.counters.dropped();
            if let Some(metrics) = self.inner.metrics.get() {
                metrics.observe_dropped();
            }
            return Err(BusError::Publish {
                topic: topic.to_owned(),
                reason: err.to_string(),
            });
        }
        log_delivery(DeliveryDirection::Outbound, topic, len);
        self.inner.counters.published();
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.observe_published();
        }
        Ok(())
    }

    /// Encode and publish a message.
    pub async fn publish_message(&self, topic: &str, message: &Message) -> Result<()> {
        let payload = self.inner.registry.serialize(message)?;
        self.publish(topic, payload).await?;
        debug!(
            topic = %topic,
            message_id = %message.message_id(),
            kind = message.kind(),
            "message published"
        );
        Ok(())
    }

    /// Stop all subscriptions and release the connection. Repeated calls are no-ops.
    ///
    /// Consumer tasks are signalled but not awaited, so this may be called from
    /// inside a message handler. No handler is started after this returns.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.open.store(false, Ordering::Release);
        self.inner.shutdown.send_replace(true);

        let previous = {
            let mut connection = self.inner.connection.lock().await;
            std::mem::replace(&mut *connection, Connection::Closed)
        };
        if let Connection::Open(transport) = previous {
            transport.close().await?;
            info!(exchange = %self.inner.config.exchange, "bus connection closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Every pattern subscribed so far, in subscription order.
    pub fn listened_topics(&self) -> Vec<String> {
        self.inner.listened.lock().clone()
    }

    pub fn exchange_name(&self) -> &str {
        &self.inner.config.exchange
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn stats(&self) -> BusStats {
        self.inner.counters.snapshot()
    }

    async fn transport(&self) -> Result<Arc<dyn Transport>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        match &*self.inner.connection.lock().await {
            Connection::Open(transport) => Ok(Arc::clone(transport)),
            Connection::Idle => Err(BusError::NotOpen),
            Connection::Closed => Err(BusError::Closed),
        }
    }
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("exchange", &self.inner.config.exchange)
            .field("open", &self.is_open())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn consume(
    mut stream: DeliveryStream,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
    metrics: Option<Arc<BusMetricsExporter>>,
    label: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            delivery = stream.recv() => {
                let Some(delivery) = delivery else {
                    debug!(patterns = %label, "delivery stream ended");
                    break;
                };
                if *shutdown.borrow() {
                    counters.dropped();
                    if let Some(metrics) = &metrics {
                        metrics.observe_dropped();
                    }
                    break;
                }
                dispatcher.dispatch(delivery).await;
            }
        }
    }
    debug!(patterns = %label, "consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::Inbound;
    use std::time::Duration;

    fn client(broker: &MemoryBroker) -> BusClient {
        BusClient::new(
            BusConfig::for_exchange("test-exchange"),
            Arc::new(broker.clone()),
            Arc::new(Registry::standard()),
        )
    }

    #[tokio::test]
    async fn open_is_idempotent_and_close_is_final() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        assert!(matches!(
            client.publish("x", "{}").await,
            Err(BusError::Publish { ref topic, .. }) if topic == "x"
        ));

        client.open().await.unwrap();
        client.open().await.unwrap();
        assert!(client.is_open());
        assert!(broker.has_exchange("test-exchange"));

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(!client.is_open());
        assert!(matches!(client.open().await, Err(BusError::Closed)));
        assert!(matches!(client.publish("x", "{}").await, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let client = client(&broker);
        assert!(matches!(client.open().await, Err(BusError::Connection(_))));
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn rejects_wildcard_publish_topics() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.open().await.unwrap();
        assert!(matches!(
            client.publish("Status.*", "{}").await,
            Err(BusError::InvalidTopic { .. })
        ));
        assert!(matches!(
            client.publish("", "{}").await,
            Err(BusError::InvalidTopic { .. })
        ));
    }

    #[tokio::test]
    async fn delivers_in_order_and_tracks_topics() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        client.open().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client
            .subscribe(&["Result.#".to_owned()], move |inbound: Inbound, topic: String| {
                let tx = tx.clone();
                async move {
                    tx.send((topic, inbound.kind()))?;
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(client.listened_topics(), vec!["Result.#".to_owned()]);

        for topic in ["Result.a", "Other", "Result.b"] {
            client.publish(topic, "{}").await.unwrap();
        }
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(("Result.a".to_owned(), "untyped")));
        assert_eq!(second, Some(("Result.b".to_owned(), "untyped")));
        assert_eq!(client.stats().published, 3);
    }
}
