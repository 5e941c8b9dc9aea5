//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "In-memory message store."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use simbus_common::SharedClock;

use crate::store::{ArchivedMessage, MessageStore, StoredMessage};
use crate::Result;

/// Keeps every stored message in a vector. Clones share the same contents.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<StoredMessage>>>,
    clock: SharedClock,
}

impl MemoryStore {
    /// Empty store stamping entries with `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            clock,
        }
    }

    /// Snapshot of the stored entries in append order.
    pub fn entries(&self) -> Vec<StoredMessage> {
        self.entries.lock().clone()
    }

    /// Entries whose topic equals `topic`.
    pub fn on_topic(&self, topic: &str) -> Vec<StoredMessage> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.message.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: ArchivedMessage) -> Result<StoredMessage> {
        let mut entries = self.entries.lock();
        let entry = StoredMessage {
            sequence: entries.len() as u64 + 1,
            recorded_at: self.clock.now(),
            message,
        };
        entries.push(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use simbus_bus::Inbound;
    use simbus_common::FixedClock;
    use simbus_msg::{MessageGenerator, SimulationState, ValidationError};

    #[tokio::test]
    async fn stores_messages_and_untyped_payloads_but_not_rejections() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap()));
        let store = MemoryStore::new(clock.clone());
        let mut generator = MessageGenerator::new("sim", "manager", clock);
        let running = generator.simulation_state(SimulationState::Running).unwrap();

        let stored = store
            .store(&Inbound::Message(running.into()), "SimState")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sequence, 1);
        assert_eq!(stored.message.message_type.as_deref(), Some("SimState"));
        assert_eq!(stored.message.message_id.as_deref(), Some("manager-1"));
        assert_eq!(stored.message.payload["SimulationState"], "running");

        let mut untyped = simbus_msg::JsonMap::new();
        untyped.insert("Type".into(), "Custom".into());
        untyped.insert("EpochNumber".into(), 4.into());
        let stored = store
            .store(&Inbound::Untyped(untyped), "Custom.topic")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sequence, 2);
        assert_eq!(stored.message.epoch_number, Some(4));
        assert_eq!(stored.message.message_id, None);

        let rejected = Inbound::Rejected(ValidationError::NotAnObject);
        assert!(store.store(&rejected, "Broken").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
        assert_eq!(store.on_topic("SimState").len(), 1);
    }
}
