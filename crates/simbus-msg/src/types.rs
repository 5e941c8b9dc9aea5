//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Typed message records exchanged over the simulation bus."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::block::QuantityBlock;
use crate::schema::{
    decode, to_json_map, validated, validators, AttributeSpec, MessageSchema, MessageType,
    Presence,
};
use crate::wire::iso_millis;
use crate::{JsonMap, Result, ValidationError};

/// Attributes every bus message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "Type")]
    message_type: String,
    #[serde(rename = "SimulationId")]
    simulation_id: String,
    #[serde(rename = "SourceProcessId")]
    source_process_id: String,
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "Timestamp", with = "iso_millis")]
    timestamp: DateTime<Utc>,
}

impl MessageHeader {
    pub const HEADER_ATTRIBUTES: [&'static str; 5] = [
        "Type",
        "SimulationId",
        "SourceProcessId",
        "MessageId",
        "Timestamp",
    ];

    pub fn new(
        message_type: impl Into<String>,
        simulation_id: impl Into<String>,
        source_process_id: impl Into<String>,
        message_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            simulation_id: simulation_id.into(),
            source_process_id: source_process_id.into(),
            message_id: message_id.into(),
            timestamp: simbus_common::time::truncate_to_millis(timestamp),
        }
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    pub fn source_process_id(&self) -> &str {
        &self.source_process_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn retagged(mut self, message_type: &str) -> Self {
        message_type.clone_into(&mut self.message_type);
        self
    }
}

/// Attributes shared by result messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAttributes {
    #[serde(rename = "EpochNumber")]
    epoch_number: u64,
    #[serde(
        rename = "LastUpdatedInEpoch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    last_updated_in_epoch: Option<u64>,
    #[serde(rename = "TriggeringMessageIds")]
    triggering_message_ids: Vec<String>,
    #[serde(
        rename = "Warnings",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    warnings: BTreeSet<String>,
}

impl ResultAttributes {
    pub fn new<I, S>(epoch_number: u64, triggering_message_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            epoch_number,
            last_updated_in_epoch: None,
            triggering_message_ids: triggering_message_ids.into_iter().map(Into::into).collect(),
            warnings: BTreeSet::new(),
        }
    }

    pub fn with_last_updated_in_epoch(mut self, epoch: u64) -> Self {
        self.last_updated_in_epoch = Some(epoch);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.insert(warning.into());
        self
    }

    pub fn epoch_number(&self) -> u64 {
        self.epoch_number
    }

    pub fn last_updated_in_epoch(&self) -> Option<u64> {
        self.last_updated_in_epoch
    }

    pub fn triggering_message_ids(&self) -> &[String] {
        &self.triggering_message_ids
    }

    pub fn warnings(&self) -> &BTreeSet<String> {
        &self.warnings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Ready,
    Error,
}

/// Announces that the simulation starts or stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStateMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(rename = "SimulationState")]
    simulation_state: SimulationState,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl SimulationStateMessage {
    pub fn new(header: MessageHeader, simulation_state: SimulationState) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            simulation_state,
            name: None,
            description: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn simulation_state(&self) -> SimulationState {
        self.simulation_state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

static SIMULATION_STATE_SCHEMA: Lazy<MessageSchema> = Lazy::new(|| {
    MessageSchema::abstract_message(SimulationStateMessage::MESSAGE_TYPE)
        .with(AttributeSpec::required(
            "SimulationState",
            validators::one_of(&["running", "stopped"]),
        ))
        .with(AttributeSpec::optional("Name", validators::string()))
        .with(AttributeSpec::optional("Description", validators::string()))
});

impl MessageType for SimulationStateMessage {
    const MESSAGE_TYPE: &'static str = "SimState";

    fn schema() -> &'static MessageSchema {
        &SIMULATION_STATE_SCHEMA
    }
}

/// Opens an epoch: the simulated interval `[StartTime, EndTime)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(flatten)]
    result: ResultAttributes,
    #[serde(rename = "StartTime", with = "iso_millis")]
    start_time: DateTime<Utc>,
    #[serde(rename = "EndTime", with = "iso_millis")]
    end_time: DateTime<Utc>,
}

impl EpochMessage {
    pub fn new(
        header: MessageHeader,
        result: ResultAttributes,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            result,
            start_time: simbus_common::time::truncate_to_millis(start_time),
            end_time: simbus_common::time::truncate_to_millis(end_time),
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn result(&self) -> &ResultAttributes {
        &self.result
    }

    pub fn epoch_number(&self) -> u64 {
        self.result.epoch_number
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }
}

static EPOCH_SCHEMA: Lazy<MessageSchema> = Lazy::new(|| {
    MessageSchema::result_message(EpochMessage::MESSAGE_TYPE)
        .with(AttributeSpec::required("StartTime", validators::timestamp()))
        .with(AttributeSpec::required("EndTime", validators::timestamp()))
        .with_record_check(
            "epoch interval",
            validators::ordered_instants("StartTime", "EndTime"),
        )
});

impl MessageType for EpochMessage {
    const MESSAGE_TYPE: &'static str = "Epoch";

    fn schema() -> &'static MessageSchema {
        &EPOCH_SCHEMA
    }
}

/// Readiness or failure report of one component for one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(flatten)]
    result: ResultAttributes,
    #[serde(rename = "Value")]
    value: StatusValue,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl StatusMessage {
    pub fn ready(header: MessageHeader, result: ResultAttributes) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            result,
            value: StatusValue::Ready,
            description: None,
        })
    }

    pub fn error(
        header: MessageHeader,
        result: ResultAttributes,
        description: impl Into<String>,
    ) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            result,
            value: StatusValue::Error,
            description: Some(description.into()),
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn result(&self) -> &ResultAttributes {
        &self.result
    }

    pub fn epoch_number(&self) -> u64 {
        self.result.epoch_number
    }

    pub fn value(&self) -> StatusValue {
        self.value
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

static STATUS_SCHEMA: Lazy<MessageSchema> = Lazy::new(|| {
    MessageSchema::result_message(StatusMessage::MESSAGE_TYPE)
        .with(AttributeSpec::required(
            "Value",
            validators::one_of(&["ready", "error"]),
        ))
        .with(AttributeSpec::optional("Description", validators::string()))
});

impl MessageType for StatusMessage {
    const MESSAGE_TYPE: &'static str = "Status";

    fn schema() -> &'static MessageSchema {
        &STATUS_SCHEMA
    }
}

/// Power state of one resource connected to a grid bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStateMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(flatten)]
    result: ResultAttributes,
    #[serde(rename = "Bus")]
    bus: String,
    #[serde(rename = "Node", default, skip_serializing_if = "Option::is_none")]
    node: Option<u8>,
    #[serde(rename = "RealPower")]
    real_power: QuantityBlock,
    #[serde(rename = "ReactivePower")]
    reactive_power: QuantityBlock,
    #[serde(rename = "StateOfCharge", default, skip_serializing_if = "Option::is_none")]
    state_of_charge: Option<QuantityBlock>,
}

impl ResourceStateMessage {
    pub fn new(
        header: MessageHeader,
        result: ResultAttributes,
        bus: impl Into<String>,
        real_power: QuantityBlock,
        reactive_power: QuantityBlock,
    ) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            result,
            bus: bus.into(),
            node: None,
            real_power,
            reactive_power,
            state_of_charge: None,
        })
    }

    /// Attach the phase the resource is connected to (1, 2 or 3).
    pub fn with_node(self, node: u8) -> Result<Self> {
        validated(Self {
            node: Some(node),
            ..self
        })
    }

    pub fn with_state_of_charge(self, state_of_charge: QuantityBlock) -> Result<Self> {
        validated(Self {
            state_of_charge: Some(state_of_charge),
            ..self
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn result(&self) -> &ResultAttributes {
        &self.result
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    pub fn node(&self) -> Option<u8> {
        self.node
    }

    pub fn real_power(&self) -> &QuantityBlock {
        &self.real_power
    }

    pub fn reactive_power(&self) -> &QuantityBlock {
        &self.reactive_power
    }

    pub fn state_of_charge(&self) -> Option<&QuantityBlock> {
        self.state_of_charge.as_ref()
    }
}

static RESOURCE_STATE_SCHEMA: Lazy<MessageSchema> = Lazy::new(|| {
    MessageSchema::result_message(ResourceStateMessage::MESSAGE_TYPE)
        .with(AttributeSpec::required("Bus", validators::string()))
        .with(AttributeSpec::optional(
            "Node",
            validators::integer_between(1, 3),
        ))
        .with(AttributeSpec::quantity("RealPower", Presence::Required))
        .with(AttributeSpec::quantity("ReactivePower", Presence::Required))
        .with(AttributeSpec::quantity("StateOfCharge", Presence::Optional))
});

impl MessageType for ResourceStateMessage {
    const MESSAGE_TYPE: &'static str = "ResourceState";

    fn schema() -> &'static MessageSchema {
        &RESOURCE_STATE_SCHEMA
    }
}

/// Result attributes plus an unchecked attribute bag. Test and ad-hoc use only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(flatten)]
    result: ResultAttributes,
    #[serde(flatten)]
    attributes: JsonMap,
}

impl ResultMessage {
    pub fn new(header: MessageHeader, result: ResultAttributes, attributes: JsonMap) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            result,
            attributes: without_declared(attributes, Self::schema()),
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn result(&self) -> &ResultAttributes {
        &self.result
    }

    pub fn attributes(&self) -> &JsonMap {
        &self.attributes
    }
}

static RESULT_SCHEMA: Lazy<MessageSchema> =
    Lazy::new(|| MessageSchema::result_message(ResultMessage::MESSAGE_TYPE).open());

impl MessageType for ResultMessage {
    const MESSAGE_TYPE: &'static str = "Result";

    fn schema() -> &'static MessageSchema {
        &RESULT_SCHEMA
    }
}

/// Abstract message attributes plus an unchecked attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralMessage {
    #[serde(flatten)]
    header: MessageHeader,
    #[serde(flatten)]
    attributes: JsonMap,
}

impl GeneralMessage {
    pub fn new(header: MessageHeader, attributes: JsonMap) -> Result<Self> {
        validated(Self {
            header: header.retagged(Self::MESSAGE_TYPE),
            attributes: without_declared(attributes, Self::schema()),
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn attributes(&self) -> &JsonMap {
        &self.attributes
    }
}

static GENERAL_SCHEMA: Lazy<MessageSchema> =
    Lazy::new(|| MessageSchema::abstract_message(GeneralMessage::MESSAGE_TYPE).open());

impl MessageType for GeneralMessage {
    const MESSAGE_TYPE: &'static str = "General";

    fn schema() -> &'static MessageSchema {
        &GENERAL_SCHEMA
    }
}

fn without_declared(attributes: JsonMap, schema: &MessageSchema) -> JsonMap {
    attributes
        .into_iter()
        .filter(|(name, value)| schema.attribute(name).is_none() && !value.is_null())
        .collect()
}

/// Instance of a message type registered at runtime.
#[derive(Debug, Clone)]
pub struct ExtensionMessage {
    schema: Arc<MessageSchema>,
    header: MessageHeader,
    attributes: JsonMap,
}

impl ExtensionMessage {
    /// Decode an attribute map already validated against `schema`.
    pub(crate) fn from_validated(schema: Arc<MessageSchema>, mut attributes: JsonMap) -> Result<Self> {
        let mut header_attributes = JsonMap::new();
        for name in MessageHeader::HEADER_ATTRIBUTES {
            if let Some(value) = attributes.remove(name) {
                header_attributes.insert(name.to_owned(), value);
            }
        }
        let header: MessageHeader = serde_json::from_value(JsonValue::Object(header_attributes))
            .map_err(|source| ValidationError::Decode {
                message_type: schema.message_type().to_owned(),
                source,
            })?;
        let attributes = schema.project(attributes);
        Ok(Self {
            schema,
            header,
            attributes,
        })
    }

    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Declared attributes beyond the header.
    pub fn attributes(&self) -> &JsonMap {
        &self.attributes
    }
}

impl PartialEq for ExtensionMessage {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.attributes == other.attributes
    }
}

impl Serialize for ExtensionMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(flatten)]
            header: &'a MessageHeader,
            #[serde(flatten)]
            attributes: &'a JsonMap,
        }

        Wire {
            header: &self.header,
            attributes: &self.attributes,
        }
        .serialize(serializer)
    }
}

/// Every message the registry can produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    SimulationState(SimulationStateMessage),
    Epoch(EpochMessage),
    Status(StatusMessage),
    ResourceState(ResourceStateMessage),
    Result(ResultMessage),
    General(GeneralMessage),
    Extension(ExtensionMessage),
}

impl Message {
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::SimulationState(message) => &message.header,
            Message::Epoch(message) => &message.header,
            Message::Status(message) => &message.header,
            Message::ResourceState(message) => &message.header,
            Message::Result(message) => &message.header,
            Message::General(message) => &message.header,
            Message::Extension(message) => &message.header,
        }
    }

    /// Result attributes, for message types that carry them.
    pub fn result(&self) -> Option<&ResultAttributes> {
        match self {
            Message::Epoch(message) => Some(&message.result),
            Message::Status(message) => Some(&message.result),
            Message::ResourceState(message) => Some(&message.result),
            Message::Result(message) => Some(&message.result),
            Message::SimulationState(_) | Message::General(_) | Message::Extension(_) => None,
        }
    }

    pub fn schema(&self) -> &MessageSchema {
        match self {
            Message::SimulationState(_) => SimulationStateMessage::schema(),
            Message::Epoch(_) => EpochMessage::schema(),
            Message::Status(_) => StatusMessage::schema(),
            Message::ResourceState(_) => ResourceStateMessage::schema(),
            Message::Result(_) => ResultMessage::schema(),
            Message::General(_) => GeneralMessage::schema(),
            Message::Extension(message) => &message.schema,
        }
    }

    pub fn message_type(&self) -> &str {
        self.header().message_type()
    }

    pub fn simulation_id(&self) -> &str {
        self.header().simulation_id()
    }

    pub fn source_process_id(&self) -> &str {
        self.header().source_process_id()
    }

    pub fn message_id(&self) -> &str {
        self.header().message_id()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header().timestamp()
    }

    pub fn epoch_number(&self) -> Option<u64> {
        self.result().map(ResultAttributes::epoch_number)
    }

    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SimulationState(_) => "state",
            Message::Epoch(_) => "epoch",
            Message::Status(_) => "status",
            Message::ResourceState(_) | Message::Result(_) => "result",
            Message::General(_) | Message::Extension(_) => "other",
        }
    }

    /// Attribute map in wire form.
    pub fn to_attributes(&self) -> Result<JsonMap> {
        to_json_map(self)
    }

    pub fn attribute(&self, name: &str) -> Option<JsonValue> {
        self.to_attributes()
            .ok()
            .and_then(|mut attributes| attributes.remove(name))
    }

    /// Replace one attribute, re-running its validator and the record checks.
    ///
    /// A null value clears an optional attribute. On error the message is left untouched.
    pub fn set_attribute(&mut self, name: &str, value: JsonValue) -> Result<()> {
        let updated = {
            let schema = self.schema();
            schema.validate_attribute(name, &value)?;
            let mut attributes = self.to_attributes()?;
            if value.is_null() {
                attributes.remove(name);
            } else {
                attributes.insert(name.to_owned(), value);
            }
            schema.validate_record(&attributes)?;
            self.rebuilt(attributes)?
        };
        *self = updated;
        Ok(())
    }

    fn rebuilt(&self, attributes: JsonMap) -> Result<Message> {
        Ok(match self {
            Message::SimulationState(_) => Message::SimulationState(decode(attributes)?),
            Message::Epoch(_) => Message::Epoch(decode(attributes)?),
            Message::Status(_) => Message::Status(decode(attributes)?),
            Message::ResourceState(_) => Message::ResourceState(decode(attributes)?),
            Message::Result(_) => Message::Result(decode(attributes)?),
            Message::General(_) => Message::General(decode(attributes)?),
            Message::Extension(message) => Message::Extension(ExtensionMessage::from_validated(
                Arc::clone(&message.schema),
                attributes,
            )?),
        })
    }
}

macro_rules! impl_from_message {
    ($($variant:ident => $record:ty),* $(,)?) => {
        $(
            impl From<$record> for Message {
                fn from(message: $record) -> Self {
                    Message::$variant(message)
                }
            }
        )*
    };
}

impl_from_message!(
    SimulationState => SimulationStateMessage,
    Epoch => EpochMessage,
    Status => StatusMessage,
    ResourceState => ResourceStateMessage,
    Result => ResultMessage,
    General => GeneralMessage,
    Extension => ExtensionMessage,
);
