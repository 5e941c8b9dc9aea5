//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Message registry: build, parse and serialize bus messages."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use simbus_common::time::{to_iso_string, SharedClock, SystemClock};
use tracing::{debug, warn};

use crate::schema::{decode, MessageSchema, MessageType, Presence};
use crate::types::{
    EpochMessage, ExtensionMessage, GeneralMessage, Message, ResourceStateMessage, ResultMessage,
    SimulationStateMessage, StatusMessage,
};
use crate::{JsonMap, Result, ValidationError};

type Decoder = Arc<dyn Fn(JsonMap) -> Result<Message> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    schema: Arc<MessageSchema>,
    decoder: Decoder,
}

/// Outcome of parsing a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Registered type, fully validated.
    Message(Message),
    /// Valid JSON object whose `Type` is missing or not registered.
    Untyped(JsonMap),
}

impl Parsed {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Parsed::Message(message) => Some(message),
            Parsed::Untyped(_) => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Parsed::Message(message) => Some(message),
            Parsed::Untyped(_) => None,
        }
    }
}

/// Mapping from type tag to schema and constructor.
///
/// The registry is cheap to clone and is shared read-only after setup.
#[derive(Clone)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    clock: SharedClock,
}

impl Registry {
    /// Empty registry.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
        }
    }

    /// Registry with every built-in message type registered.
    pub fn with_defaults(clock: SharedClock) -> Self {
        let mut registry = Self::new(clock);
        registry
            .register::<SimulationStateMessage>()
            .register::<EpochMessage>()
            .register::<StatusMessage>()
            .register::<ResourceStateMessage>()
            .register::<ResultMessage>()
            .register::<GeneralMessage>();
        registry
    }

    /// Built-in types stamped by the wall clock.
    pub fn standard() -> Self {
        Self::with_defaults(SystemClock::shared())
    }

    /// Register a typed message record.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: MessageType + Into<Message>,
    {
        let decoder: Decoder = Arc::new(|attributes| decode::<T>(attributes).map(Into::into));
        self.insert(Arc::new(T::schema().clone()), decoder);
        self
    }

    /// Register a message type declared at runtime. Its instances are
    /// [`Message::Extension`] values.
    pub fn register_schema(&mut self, schema: MessageSchema) -> Result<&mut Self> {
        for attribute in crate::types::MessageHeader::HEADER_ATTRIBUTES {
            if schema.attribute(attribute).is_none() {
                return Err(ValidationError::InvalidRecord {
                    message_type: schema.message_type().to_owned(),
                    reason: format!("schema does not declare header attribute '{attribute}'"),
                });
            }
        }
        let schema = Arc::new(schema);
        let decoder_schema = Arc::clone(&schema);
        let decoder: Decoder = Arc::new(move |attributes| {
            ExtensionMessage::from_validated(Arc::clone(&decoder_schema), attributes)
                .map(Message::Extension)
        });
        self.insert(schema, decoder);
        Ok(self)
    }

    fn insert(&mut self, schema: Arc<MessageSchema>, decoder: Decoder) {
        let tag = schema.message_type().to_owned();
        if self.entries.contains_key(&tag) {
            warn!(message_type = %tag, "replacing registered message type");
        } else {
            debug!(message_type = %tag, "registered message type");
        }
        self.entries.insert(tag, Entry { schema, decoder });
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.entries.contains_key(message_type)
    }

    pub fn message_types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn schema(&self, message_type: &str) -> Option<&MessageSchema> {
        self.entries.get(message_type).map(|entry| entry.schema.as_ref())
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Construct a validated message of a registered type.
    ///
    /// `Type` is set from `message_type`; generated attributes such as
    /// `Timestamp` are filled from the registry clock when omitted.
    pub fn build(&self, message_type: &str, mut attributes: JsonMap) -> Result<Message> {
        let entry = self
            .entries
            .get(message_type)
            .ok_or_else(|| ValidationError::UnknownType(message_type.to_owned()))?;
        attributes
            .entry("Type")
            .or_insert_with(|| JsonValue::String(message_type.to_owned()));
        for spec in entry.schema.attributes() {
            if spec.presence() != Presence::Generated {
                continue;
            }
            let missing = attributes.get(spec.name()).map_or(true, JsonValue::is_null);
            if missing {
                let now = to_iso_string(&self.clock.now());
                attributes.insert(spec.name().to_owned(), JsonValue::String(now));
            }
        }
        Self::materialize(entry, attributes)
    }

    /// Decode a wire payload.
    ///
    /// Payloads that are not a JSON object fail; objects of an unknown or
    /// missing `Type` come back as [`Parsed::Untyped`].
    pub fn parse(&self, payload: &[u8]) -> Result<Parsed> {
        let value: JsonValue = serde_json::from_slice(payload)?;
        self.parse_value(value)
    }

    pub fn parse_value(&self, value: JsonValue) -> Result<Parsed> {
        let JsonValue::Object(attributes) = value else {
            return Err(ValidationError::NotAnObject);
        };
        let entry = attributes
            .get("Type")
            .and_then(JsonValue::as_str)
            .and_then(|tag| self.entries.get(tag));
        match entry {
            Some(entry) => Self::materialize(entry, attributes).map(Parsed::Message),
            None => Ok(Parsed::Untyped(attributes)),
        }
    }

    /// Encode a message in wire form.
    pub fn serialize(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn materialize(entry: &Entry, attributes: JsonMap) -> Result<Message> {
        entry.schema.validate(&attributes)?;
        (entry.decoder)(entry.schema.project(attributes))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("message_types", &self.message_types())
            .field("clock", &self.clock)
            .finish()
    }
}
