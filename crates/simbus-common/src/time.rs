//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Shared primitives and utilities for the SimBus runtime."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! UTC instant helpers. Message timestamps carry millisecond precision and
//! are written as `YYYY-MM-DDTHH:MM:SS.sssZ`.
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_millis(Utc::now())
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(truncate_to_millis(instant)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = truncate_to_millis(instant);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.instant.lock();
        *guard = truncate_to_millis(*guard + by);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}

/// Drop sub-millisecond precision.
pub fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(3)
}

/// Format an instant in the canonical wire form.
pub fn to_iso_string(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO 8601 string into a millisecond precision UTC instant.
///
/// Strings with an offset are converted to UTC, strings without one are read as UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(truncate_to_millis(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| truncate_to_millis(naive.and_utc()))
}
