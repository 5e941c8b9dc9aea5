//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Capability interface implemented by simulation components."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simbus_bus::{BusClient, BusError, Inbound};
use simbus_msg::{EpochMessage, Message, MessageGenerator};
use tracing::debug;

/// Component specific behaviour driven by the [`ComponentEngine`](crate::ComponentEngine).
///
/// The engine owns the lifecycle (simulation state, epoch bookkeeping and
/// status reporting); a component only decides when its inputs are complete
/// and what to compute. The defaults describe a component that needs nothing
/// but the Epoch message and does no work.
#[async_trait]
pub trait SimulationComponent: Send + 'static {
    /// Called for every message that is neither a simulation state nor an epoch message.
    async fn general_message_handler(
        &mut self,
        inbound: &Inbound,
        topic: &str,
        _ctx: &mut EpochContext<'_>,
    ) -> anyhow::Result<()> {
        debug!(topic = %topic, kind = inbound.kind(), "ignoring message");
        Ok(())
    }

    /// Whether every input required for the current epoch has arrived.
    async fn all_messages_received_for_epoch(&mut self, _ctx: &EpochContext<'_>) -> bool {
        true
    }

    /// Compute the current epoch and publish any result messages.
    ///
    /// `Ok(false)` means the epoch is not finished yet; the engine calls this
    /// again on the next trigger, so implementations must be resumable.
    async fn process_epoch(&mut self, _ctx: &mut EpochContext<'_>) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Component with the default behaviour: ready as soon as each epoch starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveComponent;

impl SimulationComponent for PassiveComponent {}

/// View of the running epoch handed to component hooks.
pub struct EpochContext<'a> {
    pub(crate) epoch_number: u64,
    pub(crate) epoch: Option<&'a EpochMessage>,
    pub(crate) triggering_message_ids: &'a [String],
    pub(crate) generator: &'a mut MessageGenerator,
    pub(crate) client: &'a BusClient,
}

impl<'a> EpochContext<'a> {
    /// Latest epoch number seen by the engine (0 before the first Epoch message).
    pub fn epoch_number(&self) -> u64 {
        self.epoch_number
    }

    /// The Epoch message that opened the current epoch.
    pub fn epoch(&self) -> Option<&EpochMessage> {
        self.epoch
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.epoch.map(EpochMessage::start_time)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.epoch.map(EpochMessage::end_time)
    }

    /// Message ids that result messages of this epoch should reference.
    pub fn triggering_message_ids(&self) -> &[String] {
        self.triggering_message_ids
    }

    pub fn simulation_id(&self) -> &str {
        self.generator.simulation_id()
    }

    pub fn component_name(&self) -> &str {
        self.generator.source_process_id()
    }

    /// The component's message factory; ids continue the engine's own sequence.
    pub fn generator(&mut self) -> &mut MessageGenerator {
        self.generator
    }

    /// The engine's bus client; clone it to publish from timers or spawned tasks.
    pub fn client(&self) -> &BusClient {
        self.client
    }

    pub async fn publish(&self, topic: &str, message: impl Into<Message>) -> Result<(), BusError> {
        let message = message.into();
        self.client.publish_message(topic, &message).await
    }
}

impl std::fmt::Debug for EpochContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochContext")
            .field("epoch_number", &self.epoch_number)
            .field("triggering_message_ids", &self.triggering_message_ids)
            .field("component", &self.generator.source_process_id())
            .finish()
    }
}
