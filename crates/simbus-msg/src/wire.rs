//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Serde adapters for wire formatted attribute values."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---

/// `DateTime<Utc>` as an ISO 8601 string with millisecond precision.
pub(crate) mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use simbus_common::time::{parse_iso, to_iso_string};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_iso_string(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_iso(&raw).ok_or_else(|| D::Error::custom(format!("'{raw}' is not an ISO 8601 datetime")))
    }
}
