//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Unit of measure vocabulary for quantity attributes."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! UCUM style unit codes recognised in `UnitOfMeasure` attributes.

/// Recognised unit codes, grouped by quantity.
pub const UNIT_CODES: &[&str] = &[
    // power
    "W", "kW", "MW", "V.A", "kV.A", "MV.A", "V.A{r}", "kV.A{r}", "MV.A{r}", "kvar",
    // energy
    "W.h", "kW.h", "MW.h", "Wh", "kWh", "MWh", "J", "kJ", "MJ",
    // electrical
    "V", "kV", "A", "kA", "Ohm", "Hz", "{pu}",
    // time
    "s", "min", "h", "d",
    // temperature
    "Cel", "K",
    // geometry and mass
    "m", "km", "m2", "m3", "kg", "t", "deg", "rad",
    // ratios and money
    "%", "1", "EUR", "EUR/(kW.h)", "EUR/(MW.h)",
];

/// Namespace for unit code checks.
pub struct UnitCode;

impl UnitCode {
    /// Whether `code` is part of the recognised vocabulary (case-sensitive).
    pub fn is_valid(code: &str) -> bool {
        UNIT_CODES.contains(&code)
    }
}
