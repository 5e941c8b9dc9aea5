//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Value blocks nested inside message attributes."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::units::UnitCode;

/// A numeric value paired with a coded unit of measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityBlock {
    #[serde(rename = "Value")]
    value: f64,
    #[serde(rename = "UnitOfMeasure")]
    unit_of_measure: String,
}

impl QuantityBlock {
    pub const VALUE_ATTRIBUTE: &'static str = "Value";
    pub const UNIT_OF_MEASURE_ATTRIBUTE: &'static str = "UnitOfMeasure";

    /// Construct a block, rejecting non-finite values and unknown unit codes.
    pub fn new(value: f64, unit_of_measure: impl Into<String>) -> Result<Self, String> {
        let unit_of_measure = unit_of_measure.into();
        check_value(value)?;
        check_unit(&unit_of_measure)?;
        Ok(Self {
            value,
            unit_of_measure,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit_of_measure(&self) -> &str {
        &self.unit_of_measure
    }

    /// Validate the JSON form `{"Value": <number>, "UnitOfMeasure": <string>}`.
    pub fn validate_json(value: &JsonValue) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected a quantity block object, found {value}"))?;
        let number = object
            .get(Self::VALUE_ATTRIBUTE)
            .ok_or_else(|| "quantity block is missing 'Value'".to_owned())?
            .as_f64()
            .ok_or_else(|| "quantity block 'Value' must be a number".to_owned())?;
        check_value(number)?;
        let unit = object
            .get(Self::UNIT_OF_MEASURE_ATTRIBUTE)
            .ok_or_else(|| "quantity block is missing 'UnitOfMeasure'".to_owned())?
            .as_str()
            .ok_or_else(|| "quantity block 'UnitOfMeasure' must be a string".to_owned())?;
        check_unit(unit)
    }
}

fn check_value(value: f64) -> Result<(), String> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(format!("quantity value {value} is not finite"))
    }
}

fn check_unit(unit: &str) -> Result<(), String> {
    if UnitCode::is_valid(unit) {
        Ok(())
    } else {
        Err(format!("'{unit}' is not a recognised unit of measure"))
    }
}
