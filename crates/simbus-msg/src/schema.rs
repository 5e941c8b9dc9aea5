//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Declarative attribute schemas and per-field validators."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! A message type is described by a [`MessageSchema`]: the attributes it
//! declares, whether each one is required, optional or generated, the
//! validator attached to each attribute and any record-level constraints.
//! The registry validates every instance against its schema before decoding,
//! so adding a message type never touches registry internals.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{JsonMap, Result, ValidationError};

/// Validator attached to a single attribute.
pub type FieldCheck = Arc<dyn Fn(&JsonValue) -> std::result::Result<(), String> + Send + Sync>;

/// Constraint spanning several attributes of one message.
pub type RecordCheck = Arc<dyn Fn(&JsonMap) -> std::result::Result<(), String> + Send + Sync>;

/// Whether an attribute must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be present and non-null.
    Required,
    /// May be absent or null; absent values take the type's empty default.
    Optional,
    /// Required on the wire, filled in by the registry when omitted at build time.
    Generated,
}

/// One declared attribute of a message type.
#[derive(Clone)]
pub struct AttributeSpec {
    name: String,
    presence: Presence,
    quantity: bool,
    check: FieldCheck,
}

impl AttributeSpec {
    pub fn required(name: impl Into<String>, check: FieldCheck) -> Self {
        Self::new(name, Presence::Required, check)
    }

    pub fn optional(name: impl Into<String>, check: FieldCheck) -> Self {
        Self::new(name, Presence::Optional, check)
    }

    pub fn generated(name: impl Into<String>, check: FieldCheck) -> Self {
        Self::new(name, Presence::Generated, check)
    }

    /// A QuantityBlock valued attribute, validated recursively.
    pub fn quantity(name: impl Into<String>, presence: Presence) -> Self {
        Self {
            quantity: true,
            ..Self::new(name, presence, validators::quantity_block())
        }
    }

    fn new(name: impl Into<String>, presence: Presence, check: FieldCheck) -> Self {
        Self {
            name: name.into(),
            presence,
            quantity: false,
            check,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn is_optional(&self) -> bool {
        self.presence == Presence::Optional
    }

    pub fn is_quantity(&self) -> bool {
        self.quantity
    }

    pub fn check(&self, value: &JsonValue) -> std::result::Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("name", &self.name)
            .field("presence", &self.presence)
            .field("quantity", &self.quantity)
            .finish_non_exhaustive()
    }
}

/// Declared shape of one message type.
#[derive(Clone)]
pub struct MessageSchema {
    message_type: String,
    attributes: IndexMap<String, AttributeSpec>,
    record_checks: Vec<(String, RecordCheck)>,
    open: bool,
}

impl MessageSchema {
    /// Attributes shared by every message: `SimulationId` and `Timestamp`.
    fn base(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            attributes: IndexMap::new(),
            record_checks: Vec::new(),
            open: false,
        }
        .with(AttributeSpec::required(
            "SimulationId",
            validators::non_empty_string(),
        ))
        .with(AttributeSpec::generated("Timestamp", validators::timestamp()))
    }

    /// Schema carrying the abstract message attributes
    /// (`Type`, `SourceProcessId`, `MessageId` on top of the base ones).
    pub fn abstract_message(message_type: impl Into<String>) -> Self {
        let message_type = message_type.into();
        Self::base(message_type.clone())
            .with(AttributeSpec::required(
                "Type",
                validators::exact(message_type),
            ))
            .with(AttributeSpec::required(
                "SourceProcessId",
                validators::non_empty_string(),
            ))
            .with(AttributeSpec::required(
                "MessageId",
                validators::non_empty_string(),
            ))
    }

    /// Schema carrying the result message attributes
    /// (`EpochNumber`, `LastUpdatedInEpoch`, `TriggeringMessageIds`, `Warnings`).
    pub fn result_message(message_type: impl Into<String>) -> Self {
        Self::abstract_message(message_type)
            .with(AttributeSpec::required(
                "EpochNumber",
                validators::epoch_number(),
            ))
            .with(AttributeSpec::optional(
                "LastUpdatedInEpoch",
                validators::epoch_number(),
            ))
            .with(AttributeSpec::required(
                "TriggeringMessageIds",
                validators::message_id_list(),
            ))
            .with(AttributeSpec::optional("Warnings", validators::warnings()))
    }

    /// Declare (or redeclare) an attribute.
    pub fn with(mut self, spec: AttributeSpec) -> Self {
        self.attributes.insert(spec.name.clone(), spec);
        self
    }

    /// Declare a constraint evaluated after every field validator passed.
    pub fn with_record_check(mut self, name: impl Into<String>, check: RecordCheck) -> Self {
        self.record_checks.push((name.into(), check));
        self
    }

    /// Accept and keep undeclared attributes (attribute bag messages).
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.values()
    }

    pub fn required_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .values()
            .filter(|spec| !spec.is_optional())
            .map(AttributeSpec::name)
    }

    pub fn optional_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .values()
            .filter(|spec| spec.is_optional())
            .map(AttributeSpec::name)
    }

    pub fn quantity_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .values()
            .filter(|spec| spec.is_quantity())
            .map(AttributeSpec::name)
    }

    /// Validate a complete attribute map.
    pub fn validate(&self, attributes: &JsonMap) -> Result<()> {
        for spec in self.attributes.values() {
            match attributes.get(spec.name()) {
                None | Some(JsonValue::Null) => {
                    if !spec.is_optional() {
                        return Err(ValidationError::MissingAttribute {
                            message_type: self.message_type.clone(),
                            attribute: spec.name.clone(),
                        });
                    }
                }
                Some(value) => self.check_field(spec, value)?,
            }
        }
        self.validate_record(attributes)
    }

    /// Validate a single attribute update in isolation.
    pub fn validate_attribute(&self, name: &str, value: &JsonValue) -> Result<()> {
        let Some(spec) = self.attributes.get(name) else {
            if self.open {
                return Ok(());
            }
            return Err(ValidationError::UnknownAttribute {
                message_type: self.message_type.clone(),
                attribute: name.to_owned(),
            });
        };
        if value.is_null() {
            if spec.is_optional() {
                return Ok(());
            }
            return Err(ValidationError::MissingAttribute {
                message_type: self.message_type.clone(),
                attribute: name.to_owned(),
            });
        }
        self.check_field(spec, value)
    }

    /// Run the record-level constraints only.
    pub fn validate_record(&self, attributes: &JsonMap) -> Result<()> {
        for (name, check) in &self.record_checks {
            check(attributes).map_err(|reason| ValidationError::InvalidRecord {
                message_type: self.message_type.clone(),
                reason: format!("{name}: {reason}"),
            })?;
        }
        Ok(())
    }

    /// Drop null values and, unless the schema is open, undeclared attributes.
    pub fn project(&self, attributes: JsonMap) -> JsonMap {
        attributes
            .into_iter()
            .filter(|(name, value)| {
                !value.is_null() && (self.open || self.attributes.contains_key(name))
            })
            .collect()
    }

    fn check_field(&self, spec: &AttributeSpec, value: &JsonValue) -> Result<()> {
        spec.check(value)
            .map_err(|reason| ValidationError::InvalidAttribute {
                message_type: self.message_type.clone(),
                attribute: spec.name.clone(),
                reason,
            })
    }
}

impl fmt::Debug for MessageSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSchema")
            .field("message_type", &self.message_type)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field(
                "record_checks",
                &self.record_checks.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("open", &self.open)
            .finish()
    }
}

/// Binding between a typed message record and its schema.
pub trait MessageType: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    /// Value of the `Type` attribute.
    const MESSAGE_TYPE: &'static str;

    fn schema() -> &'static MessageSchema;
}

/// Serialize a record into its attribute map.
pub(crate) fn to_json_map<T: Serialize>(value: &T) -> Result<JsonMap> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject),
    }
}

/// Check a typed record against its schema, returning it unchanged on success.
pub fn validated<T: MessageType>(record: T) -> Result<T> {
    let attributes = to_json_map(&record)?;
    T::schema().validate(&attributes)?;
    Ok(record)
}

/// Decode an already validated attribute map into a typed record.
pub(crate) fn decode<T: MessageType>(attributes: JsonMap) -> Result<T> {
    serde_json::from_value(JsonValue::Object(attributes)).map_err(|source| {
        ValidationError::Decode {
            message_type: T::MESSAGE_TYPE.to_owned(),
            source,
        }
    })
}

/// Reusable attribute validators.
pub mod validators {
    use std::sync::Arc;

    use serde_json::Value as JsonValue;

    use super::{FieldCheck, RecordCheck};
    use crate::block::QuantityBlock;

    /// Warning tags allowed in the `Warnings` attribute.
    pub const WARNING_TYPES: &[&str] = &[
        "warning.convergence",
        "warning.input",
        "warning.input.range",
        "warning.input.unreliable",
        "warning.internal",
        "warning.other",
    ];

    pub fn any() -> FieldCheck {
        Arc::new(|_| Ok(()))
    }

    pub fn string() -> FieldCheck {
        Arc::new(|value| match value {
            JsonValue::String(_) => Ok(()),
            other => Err(format!("expected a string, found {other}")),
        })
    }

    pub fn non_empty_string() -> FieldCheck {
        Arc::new(|value| match value.as_str() {
            Some(text) if !text.is_empty() => Ok(()),
            Some(_) => Err("string must not be empty".to_owned()),
            None => Err(format!("expected a string, found {value}")),
        })
    }

    /// The value must equal `expected` exactly.
    pub fn exact(expected: impl Into<String>) -> FieldCheck {
        let expected = expected.into();
        Arc::new(move |value| match value.as_str() {
            Some(text) if text == expected => Ok(()),
            _ => Err(format!("expected '{expected}', found {value}")),
        })
    }

    /// The value must be one of the listed strings.
    pub fn one_of(allowed: &'static [&'static str]) -> FieldCheck {
        Arc::new(move |value| match value.as_str() {
            Some(text) if allowed.contains(&text) => Ok(()),
            _ => Err(format!(
                "expected one of [{}], found {value}",
                allowed.join(", ")
            )),
        })
    }

    /// An ISO 8601 datetime string.
    pub fn timestamp() -> FieldCheck {
        Arc::new(|value| match value.as_str() {
            Some(text) if simbus_common::time::parse_iso(text).is_some() => Ok(()),
            _ => Err(format!("{value} is not an ISO 8601 datetime")),
        })
    }

    /// A non-negative integer.
    pub fn epoch_number() -> FieldCheck {
        Arc::new(|value| match value.as_u64() {
            Some(_) => Ok(()),
            None => Err(format!("{value} is not a non-negative integer")),
        })
    }

    /// An integer within `min..=max`.
    pub fn integer_between(min: i64, max: i64) -> FieldCheck {
        Arc::new(move |value| match value.as_i64() {
            Some(number) if (min..=max).contains(&number) => Ok(()),
            _ => Err(format!("{value} is not an integer between {min} and {max}")),
        })
    }

    /// A non-empty list of non-empty message id strings.
    pub fn message_id_list() -> FieldCheck {
        Arc::new(|value| {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected a list of message ids, found {value}"))?;
            if items.is_empty() {
                return Err("list of message ids must not be empty".to_owned());
            }
            for item in items {
                match item.as_str() {
                    Some(id) if !id.is_empty() => {}
                    _ => return Err(format!("{item} is not a valid message id")),
                }
            }
            Ok(())
        })
    }

    /// A list of recognised warning tags, possibly empty.
    pub fn warnings() -> FieldCheck {
        Arc::new(|value| {
            let items = value
                .as_array()
                .ok_or_else(|| format!("expected a list of warnings, found {value}"))?;
            for item in items {
                match item.as_str() {
                    Some(tag) if WARNING_TYPES.contains(&tag) => {}
                    _ => return Err(format!("{item} is not a recognised warning type")),
                }
            }
            Ok(())
        })
    }

    pub fn quantity_block() -> FieldCheck {
        Arc::new(QuantityBlock::validate_json)
    }

    /// Require the instant in `earlier` to precede the instant in `later`.
    pub fn ordered_instants(earlier: &'static str, later: &'static str) -> RecordCheck {
        Arc::new(move |attributes| {
            let read = |name: &str| {
                attributes
                    .get(name)
                    .and_then(JsonValue::as_str)
                    .and_then(simbus_common::time::parse_iso)
            };
            match (read(earlier), read(later)) {
                (Some(start), Some(end)) if start < end => Ok(()),
                (Some(_), Some(_)) => Err(format!("{earlier} must be before {later}")),
                _ => Ok(()),
            }
        })
    }
}
