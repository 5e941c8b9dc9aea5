//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Prometheus metrics of the archiving sink."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    archived: IntCounterVec,
    skipped: IntCounter,
    failures: IntCounter,
    log_bytes: IntCounter,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self> {
        let archived = IntCounterVec::new(
            Opts::new(
                "simbus_messages_archived_total",
                "Messages written to a message store, by message kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(archived.clone()))?;

        let skipped = IntCounter::with_opts(Opts::new(
            "simbus_messages_archive_skipped_total",
            "Rejected deliveries that carried nothing to archive",
        ))?;
        registry.register(Box::new(skipped.clone()))?;

        let failures = IntCounter::with_opts(Opts::new(
            "simbus_archive_failures_total",
            "Messages a store failed to persist",
        ))?;
        registry.register(Box::new(failures.clone()))?;

        let log_bytes = IntCounter::with_opts(Opts::new(
            "simbus_event_log_bytes_total",
            "Bytes appended to event logs",
        ))?;
        registry.register(Box::new(log_bytes.clone()))?;

        Ok(Self {
            archived,
            skipped,
            failures,
            log_bytes,
        })
    }

    /// Count one archived message of the given kind.
    pub fn record_archived(&self, kind: &str) {
        self.archived.with_label_values(&[kind]).inc();
    }

    /// Count one delivery that was not archived.
    pub fn record_skipped(&self) {
        self.skipped.inc();
    }

    /// Count one store failure.
    pub fn record_failure(&self) {
        self.failures.inc();
    }

    /// Add appended bytes.
    pub fn record_log_bytes(&self, bytes: usize) {
        self.log_bytes.inc_by(bytes as u64);
    }
}
