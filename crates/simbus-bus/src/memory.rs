//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "In-process topic broker used for tests and single-process runs."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use simbus_common::BusConfig;
use tokio::sync::mpsc;
use tracing::debug;

use crate::topic;
use crate::transport::{Connector, Delivery, DeliveryStream, ExchangeSpec, Transport};
use crate::{BusError, Result};

struct Queue {
    connection: u64,
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct Exchange {
    spec: ExchangeSpec,
    queues: Vec<Queue>,
    history: Vec<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    credentials: Option<(String, String)>,
    unavailable: bool,
}

/// Topic exchange broker living inside the process.
///
/// Routing follows topic exchange rules: every queue whose binding matches
/// the routing key receives its own copy, in publication order.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_connection: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that only accepts the given login and password.
    pub fn with_credentials(login: impl Into<String>, password: impl Into<String>) -> Self {
        let broker = Self::default();
        broker.state.lock().credentials = Some((login.into(), password.into()));
        broker
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Every delivery published on `exchange` so far.
    pub fn history(&self, exchange: &str) -> Vec<Delivery> {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map(|exchange| exchange.history.clone())
            .unwrap_or_default()
    }

    /// Published deliveries whose routing key matches `pattern`.
    pub fn published_on(&self, exchange: &str, pattern: &str) -> Vec<Delivery> {
        self.history(exchange)
            .into_iter()
            .filter(|delivery| topic::matches(pattern, &delivery.routing_key))
            .collect()
    }

    pub fn queue_count(&self, exchange: &str) -> usize {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .map_or(0, |exchange| exchange.queues.len())
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().exchanges.contains_key(exchange)
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("exchanges", &state.exchanges.keys().collect::<Vec<_>>())
            .field("available", &!state.unavailable)
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn Transport>> {
        {
            let state = self.state.lock();
            if state.unavailable {
                return Err(BusError::Connection(format!(
                    "broker {}:{} is unreachable",
                    config.host, config.port
                )));
            }
            if let Some((login, password)) = &state.credentials {
                if login != &config.login || password != &config.password {
                    return Err(BusError::Connection(format!(
                        "access refused for login '{}'",
                        config.login
                    )));
                }
            }
        }
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, host = %config.host, "memory broker connection opened");
        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            id,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryConnection {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing.spec != *exchange => Err(BusError::Transport(format!(
                "exchange '{}' already declared with durable={} auto_delete={}",
                exchange.name, existing.spec.durable, existing.spec.auto_delete
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    exchange.name.clone(),
                    Exchange {
                        spec: exchange.clone(),
                        queues: Vec::new(),
                        history: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn subscribe(&self, exchange: &str, patterns: &[String]) -> Result<DeliveryStream> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::Transport(format!("exchange '{exchange}' is not declared")))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        target.queues.push(Queue {
            connection: self.id,
            patterns: patterns.to_vec(),
            sender,
        });
        Ok(receiver)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::Transport(format!("exchange '{exchange}' is not declared")))?;
        let delivery = Delivery {
            routing_key: routing_key.to_owned(),
            payload,
        };
        target.queues.retain(|queue| {
            let bound = queue
                .patterns
                .iter()
                .any(|pattern| topic::matches(pattern, routing_key));
            !bound || queue.sender.send(delivery.clone()).is_ok()
        });
        target.history.push(delivery);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.broker.state.lock();
        state.exchanges.retain(|_, exchange| {
            let before = exchange.queues.len();
            exchange.queues.retain(|queue| queue.connection != self.id);
            let released = before != exchange.queues.len();
            !(exchange.spec.auto_delete && released && exchange.queues.is_empty())
        });
        debug!(connection = self.id, "memory broker connection closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
