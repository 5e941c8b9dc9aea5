//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Typed simulation messages, schemas and the message registry."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! Message model for the simulation bus.
//!
//! Every message is validated against its [`MessageSchema`] on construction,
//! on parse and on every attribute update, so a value of [`Message`] is always
//! schema-valid.
pub mod block;
pub mod generator;
pub mod registry;
pub mod schema;
pub mod types;
pub mod units;

mod wire;

pub use block::QuantityBlock;
pub use generator::MessageGenerator;
pub use registry::{Parsed, Registry};
pub use schema::{validated, validators, AttributeSpec, MessageSchema, MessageType, Presence};
pub use types::{
    EpochMessage, ExtensionMessage, GeneralMessage, Message, MessageHeader, ResourceStateMessage,
    ResultAttributes, ResultMessage, SimulationState, SimulationStateMessage, StatusMessage,
    StatusValue,
};
pub use units::UnitCode;

/// Attribute map of one message in its JSON form.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Result alias for message operations.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Reasons a message fails to satisfy its schema.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{message_type}: required attribute '{attribute}' is missing")]
    MissingAttribute {
        message_type: String,
        attribute: String,
    },
    #[error("{message_type}: invalid value for '{attribute}': {reason}")]
    InvalidAttribute {
        message_type: String,
        attribute: String,
        reason: String,
    },
    #[error("{message_type}: {reason}")]
    InvalidRecord {
        message_type: String,
        reason: String,
    },
    #[error("{message_type}: '{attribute}' is not a declared attribute")]
    UnknownAttribute {
        message_type: String,
        attribute: String,
    },
    #[error("message type '{0}' is not registered")]
    UnknownType(String),
    #[error("message payload must be a JSON object")]
    NotAnObject,
    #[error("message payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{message_type}: failed to decode validated attributes: {source}")]
    Decode {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ValidationError {
    /// Name of the offending attribute, when the failure concerns one.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::MissingAttribute { attribute, .. }
            | Self::InvalidAttribute { attribute, .. }
            | Self::UnknownAttribute { attribute, .. } => Some(attribute),
            _ => None,
        }
    }
}
