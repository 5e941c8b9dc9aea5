//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Per-component message id sequence and message factory."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use simbus_common::time::SharedClock;

use crate::block::QuantityBlock;
use crate::schema::MessageType;
use crate::types::{
    EpochMessage, GeneralMessage, MessageHeader, ResourceStateMessage, ResultAttributes,
    SimulationState, SimulationStateMessage, StatusMessage,
};
use crate::{JsonMap, Result};

/// Produces messages stamped with `"<SourceProcessId>-<n>"` ids.
///
/// Each component owns one generator; `n` starts at 1 unless configured and
/// strictly increases with every message produced.
#[derive(Debug)]
pub struct MessageGenerator {
    simulation_id: String,
    source_process_id: String,
    next_number: u64,
    clock: SharedClock,
}

impl MessageGenerator {
    pub fn new(
        simulation_id: impl Into<String>,
        source_process_id: impl Into<String>,
        clock: SharedClock,
    ) -> Self {
        Self::starting_at(simulation_id, source_process_id, 1, clock)
    }

    pub fn starting_at(
        simulation_id: impl Into<String>,
        source_process_id: impl Into<String>,
        start: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            source_process_id: source_process_id.into(),
            next_number: start,
            clock,
        }
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    pub fn source_process_id(&self) -> &str {
        &self.source_process_id
    }

    pub fn next_message_id(&mut self) -> String {
        let id = format!("{}-{}", self.source_process_id, self.next_number);
        self.next_number += 1;
        id
    }

    /// Fresh header for a message of `message_type`.
    pub fn header(&mut self, message_type: &str) -> MessageHeader {
        let message_id = self.next_message_id();
        MessageHeader::new(
            message_type,
            self.simulation_id.clone(),
            self.source_process_id.clone(),
            message_id,
            self.clock.now(),
        )
    }

    pub fn simulation_state(&mut self, state: SimulationState) -> Result<SimulationStateMessage> {
        let header = self.header(SimulationStateMessage::MESSAGE_TYPE);
        SimulationStateMessage::new(header, state)
    }

    pub fn epoch<I, S>(
        &mut self,
        epoch_number: u64,
        triggering_message_ids: I,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<EpochMessage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = self.header(EpochMessage::MESSAGE_TYPE);
        EpochMessage::new(
            header,
            ResultAttributes::new(epoch_number, triggering_message_ids),
            start_time,
            end_time,
        )
    }

    pub fn status_ready<I, S>(&mut self, epoch_number: u64, triggering_message_ids: I) -> Result<StatusMessage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = self.header(StatusMessage::MESSAGE_TYPE);
        StatusMessage::ready(header, ResultAttributes::new(epoch_number, triggering_message_ids))
    }

    pub fn status_error<I, S>(
        &mut self,
        epoch_number: u64,
        triggering_message_ids: I,
        description: impl Into<String>,
    ) -> Result<StatusMessage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = self.header(StatusMessage::MESSAGE_TYPE);
        StatusMessage::error(
            header,
            ResultAttributes::new(epoch_number, triggering_message_ids),
            description,
        )
    }

    pub fn resource_state<I, S>(
        &mut self,
        epoch_number: u64,
        triggering_message_ids: I,
        bus: impl Into<String>,
        real_power: QuantityBlock,
        reactive_power: QuantityBlock,
    ) -> Result<ResourceStateMessage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = self.header(ResourceStateMessage::MESSAGE_TYPE);
        ResourceStateMessage::new(
            header,
            ResultAttributes::new(epoch_number, triggering_message_ids),
            bus,
            real_power,
            reactive_power,
        )
    }

    pub fn general(&mut self, attributes: JsonMap) -> Result<GeneralMessage> {
        let header = self.header(GeneralMessage::MESSAGE_TYPE);
        GeneralMessage::new(header, attributes)
    }
}
