//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Message stores and bus archiving."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
#![warn(missing_docs)]

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing log files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A message could not be turned into its wire attributes.
    #[error("message error: {0}")]
    Message(#[from] simbus_msg::ValidationError),
    /// The first line of an event log is missing or fails its digest check.
    #[error("invalid event log header: {0}")]
    InvalidHeader(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod archive;
pub mod event_log;
pub mod memory;
pub mod metrics;
pub mod store;

pub use archive::ArchiveListener;
pub use event_log::replay as replay_event_log;
pub use event_log::{EventLogHeader, EventLogReader, EventLogStore, EventLogWriter, EVENT_LOG_VERSION};
pub use memory::MemoryStore;
pub use metrics::PersistenceMetrics;
pub use store::{ArchivedMessage, MessageStore, StoredMessage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_name_the_problem() {
        let err = PersistenceError::InvalidHeader("digest mismatch".into());
        assert_eq!(format!("{err}"), "invalid event log header: digest mismatch");
    }
}
