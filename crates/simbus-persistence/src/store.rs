//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Storage interface for archived bus messages."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simbus_bus::Inbound;

use crate::Result;

/// A bus message as it is handed to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    /// Routing key the message was delivered with.
    pub topic: String,
    /// `Type` attribute, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// `MessageId` attribute, when the payload carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// `EpochNumber` of result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_number: Option<u64>,
    /// The message attributes in wire form.
    pub payload: serde_json::Value,
}

impl ArchivedMessage {
    /// Capture a decoded delivery. Rejected payloads carry no attributes and yield `None`.
    pub fn from_inbound(inbound: &Inbound, topic: &str) -> Result<Option<Self>> {
        let archived = match inbound {
            Inbound::Message(message) => Some(Self {
                topic: topic.to_owned(),
                message_type: Some(message.message_type().to_owned()),
                message_id: Some(message.message_id().to_owned()),
                epoch_number: message.epoch_number(),
                payload: serde_json::Value::Object(message.to_attributes()?),
            }),
            Inbound::Untyped(attributes) => Some(Self {
                topic: topic.to_owned(),
                message_type: string_attribute(attributes, "Type"),
                message_id: string_attribute(attributes, "MessageId"),
                epoch_number: attributes.get("EpochNumber").and_then(serde_json::Value::as_u64),
                payload: serde_json::Value::Object(attributes.clone()),
            }),
            Inbound::Rejected(_) => None,
        };
        Ok(archived)
    }
}

fn string_attribute(attributes: &simbus_msg::JsonMap, name: &str) -> Option<String> {
    attributes
        .get(name)
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}

/// An archived message with the position and time assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Sequential identifier, starting at 1 for each log.
    pub sequence: u64,
    /// When the store accepted the message.
    pub recorded_at: DateTime<Utc>,
    /// The archived message itself.
    #[serde(flatten)]
    pub message: ArchivedMessage,
}

/// Sink for bus traffic.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message and return it with its assigned sequence number.
    async fn append(&self, message: ArchivedMessage) -> Result<StoredMessage>;

    /// Flush buffered writes, if the store buffers.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Persist a decoded delivery. Rejected deliveries are skipped.
    async fn store(&self, inbound: &Inbound, topic: &str) -> Result<Option<StoredMessage>> {
        match ArchivedMessage::from_inbound(inbound, topic)? {
            Some(message) => Ok(Some(self.append(message).await?)),
            None => Ok(None),
        }
    }
}
