//! ---
//! simbus_section: "03-persistence-logging"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Bus handler that archives every delivery."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use simbus_bus::{Inbound, MessageHandler};
use tracing::{debug, warn};

use crate::metrics::PersistenceMetrics;
use crate::store::MessageStore;

/// Stores every delivery it receives.
///
/// Subscribe it with `#` to archive the whole exchange. Store failures are
/// returned to the dispatcher, which logs and counts them.
#[derive(Clone)]
pub struct ArchiveListener {
    store: Arc<dyn MessageStore>,
    metrics: Option<PersistenceMetrics>,
}

impl ArchiveListener {
    /// Archive into `store`.
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Count archived, skipped and failed deliveries on `metrics`.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The store messages are written to.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }
}

#[async_trait]
impl MessageHandler for ArchiveListener {
    async fn handle(&self, inbound: Inbound, topic: String) -> anyhow::Result<()> {
        match self.store.store(&inbound, &topic).await {
            Ok(Some(entry)) => {
                debug!(
                    topic = %topic,
                    sequence = entry.sequence,
                    message_id = entry.message.message_id.as_deref().unwrap_or("-"),
                    "message archived"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_archived(inbound.kind());
                }
                Ok(())
            }
            Ok(None) => {
                if let Inbound::Rejected(error) = &inbound {
                    warn!(topic = %topic, error = %error, "rejected delivery not archived");
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_skipped();
                }
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure();
                }
                Err(anyhow::Error::new(err).context(format!("archiving message on '{topic}'")))
            }
        }
    }
}
