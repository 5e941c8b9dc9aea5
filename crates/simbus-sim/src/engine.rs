//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Epoch barrier state machine of a simulation component."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! The engine reacts to three kinds of traffic:
//!
//! * `SimState` messages start (`running`) and end (`stopped`) the simulation.
//! * `Epoch` messages open a new epoch.
//! * anything else is handed to the component and re-evaluates the epoch.
//!
//! At most one ready status is published per epoch. The check against
//! `ready_sent_for` is the first thing [`ComponentEngine::start_epoch`] does,
//! and all of it runs under the engine lock.
use std::sync::Arc;

use async_trait::async_trait;
use simbus_bus::{BusClient, Inbound, MessageHandler};
use simbus_common::{ComponentConfig, TopicConfig};
use simbus_msg::{EpochMessage, Message, MessageGenerator, SimulationState, SimulationStateMessage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::component::{EpochContext, SimulationComponent};
use crate::{EngineError, Result};

/// Lifecycle of a component engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not subscribed yet.
    Created,
    /// Subscribed, waiting for the simulation to start.
    AwaitingRun,
    /// Waiting for the inputs of the current epoch.
    AwaitingEpoch,
    /// Processing the current epoch.
    Busy,
    /// Terminal.
    Stopped,
}

struct EngineCore<C> {
    component: C,
    state: EngineState,
    generator: MessageGenerator,
    epoch: Option<EpochMessage>,
    latest_epoch: u64,
    ready_sent_for: Option<u64>,
    error_sent_for: Option<u64>,
    triggering_message_ids: Vec<String>,
    initialization_error: Option<String>,
}

impl<C> EngineCore<C> {
    fn context<'a>(
        epoch_number: u64,
        epoch: &'a Option<EpochMessage>,
        triggering_message_ids: &'a [String],
        generator: &'a mut MessageGenerator,
        client: &'a BusClient,
    ) -> EpochContext<'a> {
        EpochContext {
            epoch_number,
            epoch: epoch.as_ref(),
            triggering_message_ids,
            generator,
            client,
        }
    }
}

struct EngineShared<C> {
    config: ComponentConfig,
    topics: TopicConfig,
    client: BusClient,
    core: Mutex<EngineCore<C>>,
}

/// Drives one [`SimulationComponent`] through the epoch protocol.
///
/// Clones share the same engine.
pub struct ComponentEngine<C> {
    shared: Arc<EngineShared<C>>,
}

impl<C> Clone for ComponentEngine<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: SimulationComponent> ComponentEngine<C> {
    pub fn new(config: ComponentConfig, topics: TopicConfig, client: BusClient, component: C) -> Self {
        let generator = MessageGenerator::new(
            config.simulation_id.clone(),
            config.component_name.clone(),
            Arc::clone(client.registry().clock()),
        );
        Self {
            shared: Arc::new(EngineShared {
                config,
                topics,
                client,
                core: Mutex::new(EngineCore {
                    component,
                    state: EngineState::Created,
                    generator,
                    epoch: None,
                    latest_epoch: 0,
                    ready_sent_for: None,
                    error_sent_for: None,
                    triggering_message_ids: Vec::new(),
                    initialization_error: None,
                }),
            }),
        }
    }

    /// Open the bus client and subscribe to the component's topics.
    pub async fn start(&self) -> Result<()> {
        let mut core = self.shared.core.lock().await;
        match core.state {
            EngineState::Created => {}
            EngineState::Stopped => return Err(EngineError::Stopped),
            _ => return Ok(()),
        }
        self.shared.client.open().await?;
        let topics = self.shared.topics.listened();
        let handler = EngineHandler {
            shared: Arc::clone(&self.shared),
        };
        self.shared.client.subscribe(&topics, handler).await?;
        core.state = EngineState::AwaitingRun;
        info!(
            component = %self.shared.config.component_name,
            simulation_id = %self.shared.config.simulation_id,
            topics = ?topics,
            "component started"
        );
        Ok(())
    }

    /// Enter the terminal state and close the bus client. Repeated calls are no-ops.
    pub async fn stop(&self) -> Result<()> {
        let mut core = self.shared.core.lock().await;
        self.shared.stop(&mut core).await
    }

    /// Re-evaluate the current epoch. Returns whether its ready status has been sent.
    pub async fn start_epoch(&self) -> Result<bool> {
        let mut core = self.shared.core.lock().await;
        self.shared.start_epoch(&mut core).await
    }

    /// Publish an error status for the current epoch on the error topic.
    pub async fn send_error(&self, description: &str) -> Result<()> {
        let mut core = self.shared.core.lock().await;
        self.shared.send_error(&mut core, description).await
    }

    /// Mark the component as misconfigured: the simulation start is then
    /// answered with an error status instead of a ready status.
    pub async fn set_initialization_error(&self, description: Option<String>) {
        self.shared.core.lock().await.initialization_error = description;
    }

    pub async fn state(&self) -> EngineState {
        self.shared.core.lock().await.state
    }

    pub async fn latest_epoch(&self) -> u64 {
        self.shared.core.lock().await.latest_epoch
    }

    /// Latest epoch whose ready status was published.
    pub async fn completed_epoch(&self) -> Option<u64> {
        self.shared.core.lock().await.ready_sent_for
    }

    /// Inspect the component under the engine lock.
    pub async fn with_component<R>(&self, inspect: impl FnOnce(&C) -> R) -> R {
        inspect(&self.shared.core.lock().await.component)
    }

    pub fn simulation_id(&self) -> &str {
        &self.shared.config.simulation_id
    }

    pub fn component_name(&self) -> &str {
        &self.shared.config.component_name
    }

    pub fn client(&self) -> &BusClient {
        &self.shared.client
    }
}

impl<C> std::fmt::Debug for ComponentEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentEngine")
            .field("simulation_id", &self.shared.config.simulation_id)
            .field("component", &self.shared.config.component_name)
            .finish_non_exhaustive()
    }
}

impl<C: SimulationComponent> EngineShared<C> {
    async fn on_message(&self, inbound: Inbound, topic: &str) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.state == EngineState::Stopped {
            debug!(topic = %topic, "component stopped, discarding message");
            return Ok(());
        }
        match inbound {
            Inbound::Message(Message::SimulationState(message)) => {
                self.on_simulation_state(&mut core, message).await
            }
            Inbound::Message(Message::Epoch(message)) => self.on_epoch(&mut core, message).await,
            other => self.on_general(&mut core, other, topic).await,
        }
    }

    async fn on_simulation_state(
        &self,
        core: &mut EngineCore<C>,
        message: SimulationStateMessage,
    ) -> Result<()> {
        let header = message.header();
        if header.simulation_id() != self.config.simulation_id {
            info!(
                received = %header.simulation_id(),
                expected = %self.config.simulation_id,
                "state message for a different simulation"
            );
            return Ok(());
        }
        match message.simulation_state() {
            SimulationState::Running => {
                if core.state != EngineState::AwaitingRun {
                    debug!(state = ?core.state, "simulation already running");
                    return Ok(());
                }
                core.triggering_message_ids = vec![header.message_id().to_owned()];
                core.state = EngineState::AwaitingEpoch;
                info!(component = %self.config.component_name, "simulation running");
                if core.latest_epoch == 0 && core.ready_sent_for.is_none() {
                    match core.initialization_error.clone() {
                        Some(description) => self.send_error(core, &description).await?,
                        None => self.send_ready(core).await?,
                    }
                }
                Ok(())
            }
            SimulationState::Stopped => self.stop(core).await,
        }
    }

    async fn on_epoch(&self, core: &mut EngineCore<C>, message: EpochMessage) -> Result<()> {
        let header = message.header();
        if header.simulation_id() != self.config.simulation_id {
            info!(
                received = %header.simulation_id(),
                expected = %self.config.simulation_id,
                "epoch message for a different simulation"
            );
            return Ok(());
        }
        if core.state == EngineState::AwaitingRun {
            warn!(epoch = message.epoch_number(), "epoch message before the simulation is running");
            return Ok(());
        }
        let epoch_number = message.epoch_number();
        if epoch_number < core.latest_epoch {
            warn!(epoch = epoch_number, latest = core.latest_epoch, "ignoring stale epoch message");
            return Ok(());
        }
        if epoch_number == core.latest_epoch && core.ready_sent_for == Some(epoch_number) {
            info!(epoch = epoch_number, "status already sent for this epoch");
            return Ok(());
        }
        if epoch_number > core.latest_epoch || core.epoch.is_none() {
            if core.state == EngineState::Busy {
                warn!(
                    unfinished = core.latest_epoch,
                    epoch = epoch_number,
                    "new epoch started before the previous one completed"
                );
            }
            core.latest_epoch = epoch_number;
            core.triggering_message_ids = vec![header.message_id().to_owned()];
            core.epoch = Some(message);
            core.state = EngineState::AwaitingEpoch;
            debug!(epoch = epoch_number, "epoch opened");
        }
        if !self.start_epoch(core).await? {
            debug!(epoch = epoch_number, "waiting for further input before completing the epoch");
        }
        Ok(())
    }

    async fn on_general(&self, core: &mut EngineCore<C>, inbound: Inbound, topic: &str) -> Result<()> {
        if !matches!(core.state, EngineState::AwaitingEpoch | EngineState::Busy) {
            debug!(topic = %topic, state = ?core.state, "message before the simulation is running");
            return Ok(());
        }
        let handled = {
            let EngineCore {
                component,
                generator,
                epoch,
                latest_epoch,
                triggering_message_ids,
                ..
            } = &mut *core;
            let mut ctx = EngineCore::<C>::context(
                *latest_epoch,
                epoch,
                triggering_message_ids,
                generator,
                &self.client,
            );
            component.general_message_handler(&inbound, topic, &mut ctx).await
        };
        if let Err(err) = handled {
            warn!(topic = %topic, error = %format!("{err:#}"), "component failed to handle message");
        }
        self.start_epoch(core).await?;
        Ok(())
    }

    async fn start_epoch(&self, core: &mut EngineCore<C>) -> Result<bool> {
        if core.ready_sent_for == Some(core.latest_epoch) {
            return Ok(true);
        }
        if !matches!(core.state, EngineState::AwaitingEpoch | EngineState::Busy) || core.epoch.is_none() {
            return Ok(false);
        }
        let epoch_number = core.latest_epoch;

        let outcome = {
            let EngineCore {
                component,
                generator,
                epoch,
                triggering_message_ids,
                state,
                ..
            } = &mut *core;
            let mut ctx = EngineCore::<C>::context(
                epoch_number,
                epoch,
                triggering_message_ids,
                generator,
                &self.client,
            );
            if !component.all_messages_received_for_epoch(&ctx).await {
                return Ok(false);
            }
            *state = EngineState::Busy;
            component.process_epoch(&mut ctx).await
        };

        match outcome {
            Ok(true) => {
                self.send_ready(core).await?;
                core.state = EngineState::AwaitingEpoch;
                info!(
                    component = %self.config.component_name,
                    epoch = epoch_number,
                    "epoch completed"
                );
                Ok(true)
            }
            Ok(false) => {
                debug!(epoch = epoch_number, "epoch processing not finished");
                Ok(false)
            }
            Err(err) => {
                let description = format!("{err:#}");
                warn!(epoch = epoch_number, error = %description, "epoch processing failed");
                if core.error_sent_for != Some(epoch_number) {
                    self.send_error(core, &description).await?;
                }
                Ok(false)
            }
        }
    }

    async fn send_ready(&self, core: &mut EngineCore<C>) -> Result<()> {
        let epoch_number = core.latest_epoch;
        let status = core
            .generator
            .status_ready(epoch_number, core.triggering_message_ids.iter().cloned())?;
        self.client
            .publish_message(&self.topics.status, &status.into())
            .await?;
        core.ready_sent_for = Some(epoch_number);
        debug!(epoch = epoch_number, topic = %self.topics.status, "ready status sent");
        Ok(())
    }

    async fn send_error(&self, core: &mut EngineCore<C>, description: &str) -> Result<()> {
        let epoch_number = core.latest_epoch;
        let triggers = if core.triggering_message_ids.is_empty() {
            vec![self.config.component_name.clone()]
        } else {
            core.triggering_message_ids.clone()
        };
        let status = core
            .generator
            .status_error(epoch_number, triggers, description)?;
        self.client
            .publish_message(&self.topics.error, &status.into())
            .await?;
        core.error_sent_for = Some(epoch_number);
        warn!(epoch = epoch_number, description = %description, "error status sent");
        Ok(())
    }

    async fn stop(&self, core: &mut EngineCore<C>) -> Result<()> {
        if core.state == EngineState::Stopped {
            return Ok(());
        }
        core.state = EngineState::Stopped;
        info!(component = %self.config.component_name, "component stopping");
        self.client.close().await?;
        Ok(())
    }
}

struct EngineHandler<C> {
    shared: Arc<EngineShared<C>>,
}

#[async_trait]
impl<C: SimulationComponent> MessageHandler for EngineHandler<C> {
    async fn handle(&self, inbound: Inbound, topic: String) -> anyhow::Result<()> {
        self.shared.on_message(inbound, &topic).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PassiveComponent;
    use chrono::{TimeZone, Utc};
    use simbus_bus::MemoryBroker;
    use simbus_common::{BusConfig, FixedClock};
    use simbus_msg::{Registry, StatusMessage, StatusValue};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    struct Harness {
        broker: MemoryBroker,
        registry: Arc<Registry>,
        manager: BusClient,
        generator: MessageGenerator,
        statuses: mpsc::UnboundedReceiver<(String, StatusMessage)>,
    }

    impl Harness {
        async fn new() -> Self {
            let broker = MemoryBroker::new();
            let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            let registry = Arc::new(Registry::with_defaults(Arc::new(clock)));
            let manager = BusClient::new(
                BusConfig::for_exchange("engine"),
                Arc::new(broker.clone()),
                Arc::clone(&registry),
            );
            manager.open().await.unwrap();
            let (tx, statuses) = mpsc::unbounded_channel();
            manager
                .subscribe(&["Status.#".to_owned()], move |inbound: Inbound, topic: String| {
                    let tx = tx.clone();
                    async move {
                        if let Some(Message::Status(status)) = inbound.into_message() {
                            tx.send((topic, status))?;
                        }
                        Ok::<(), anyhow::Error>(())
                    }
                })
                .await
                .unwrap();
            let generator = MessageGenerator::new("sim-1", "manager", Arc::clone(registry.clock()));
            Self {
                broker,
                registry,
                manager,
                generator,
                statuses,
            }
        }

        async fn engine<C: SimulationComponent>(&self, component: C) -> ComponentEngine<C> {
            let client = BusClient::new(
                BusConfig::for_exchange("engine"),
                Arc::new(self.broker.clone()),
                Arc::clone(&self.registry),
            );
            let engine = ComponentEngine::new(
                ComponentConfig::new("sim-1", "component-a"),
                TopicConfig::default(),
                client,
                component,
            );
            engine.start().await.unwrap();
            engine
        }

        async fn send(&self, topic: &str, message: impl Into<Message>) -> String {
            let message = message.into();
            self.manager.publish_message(topic, &message).await.unwrap();
            message.message_id().to_owned()
        }

        async fn running(&mut self) -> String {
            let message = self.generator.simulation_state(SimulationState::Running).unwrap();
            self.send("SimState", message).await
        }

        async fn epoch(&mut self, number: u64) -> String {
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::hours(i64::try_from(number).unwrap());
            let message = self
                .generator
                .epoch(number, ["manager-1"], start, start + chrono::Duration::hours(1))
                .unwrap();
            self.send("Epoch", message).await
        }

        async fn next_status(&mut self) -> (String, StatusMessage) {
            timeout(WAIT, self.statuses.recv()).await.unwrap().unwrap()
        }

        async fn assert_quiet(&mut self) {
            assert!(timeout(QUIET, self.statuses.recv()).await.is_err());
        }
    }

    #[derive(Default)]
    struct FlakyComponent {
        attempts: u32,
    }

    #[async_trait]
    impl SimulationComponent for FlakyComponent {
        async fn process_epoch(&mut self, _ctx: &mut EpochContext<'_>) -> anyhow::Result<bool> {
            self.attempts += 1;
            if self.attempts == 1 {
                anyhow::bail!("solver diverged");
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn running_is_answered_with_a_ready_status_for_epoch_zero() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        assert_eq!(engine.state().await, EngineState::AwaitingRun);

        let running_id = harness.running().await;
        let (topic, status) = harness.next_status().await;
        assert_eq!(topic, "Status.Ready");
        assert_eq!(status.value(), StatusValue::Ready);
        assert_eq!(status.epoch_number(), 0);
        assert_eq!(status.result().triggering_message_ids(), [running_id]);
        assert_eq!(status.header().source_process_id(), "component-a");
        assert_eq!(engine.state().await, EngineState::AwaitingEpoch);
        assert!(engine.start_epoch().await.unwrap());

        // a second running message does not repeat the status
        harness.running().await;
        harness.assert_quiet().await;
    }

    #[tokio::test]
    async fn initialization_error_replaces_the_first_ready_status() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        engine
            .set_initialization_error(Some("missing resource parameters".to_owned()))
            .await;

        harness.running().await;
        let (topic, status) = harness.next_status().await;
        assert_eq!(topic, "Status.Error");
        assert_eq!(status.value(), StatusValue::Error);
        assert_eq!(status.description(), Some("missing resource parameters"));
        assert_eq!(engine.completed_epoch().await, None);
    }

    #[tokio::test]
    async fn stale_duplicate_and_foreign_epochs_are_ignored() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        harness.running().await;
        harness.next_status().await;

        let epoch_id = harness.epoch(2).await;
        let (_, status) = harness.next_status().await;
        assert_eq!(status.epoch_number(), 2);
        assert_eq!(status.result().triggering_message_ids(), [epoch_id]);

        harness.epoch(2).await;
        harness.epoch(1).await;
        let mut other = MessageGenerator::new("sim-2", "manager", Arc::clone(harness.registry.clock()));
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let foreign = other
            .epoch(3, ["x"], start, start + chrono::Duration::hours(1))
            .unwrap();
        harness.send("Epoch", foreign).await;
        harness.assert_quiet().await;
        assert_eq!(engine.latest_epoch().await, 2);
        assert_eq!(engine.completed_epoch().await, Some(2));
    }

    #[tokio::test]
    async fn epochs_before_running_are_ignored() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        harness.epoch(1).await;
        harness.assert_quiet().await;
        assert_eq!(engine.state().await, EngineState::AwaitingRun);
        assert_eq!(engine.latest_epoch().await, 0);
    }

    #[tokio::test]
    async fn failed_processing_reports_one_error_and_recovers() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(FlakyComponent::default()).await;
        harness.running().await;
        harness.next_status().await;

        harness.epoch(1).await;
        let (topic, status) = harness.next_status().await;
        assert_eq!(topic, "Status.Error");
        assert_eq!(status.epoch_number(), 1);
        assert_eq!(status.description(), Some("solver diverged"));
        assert_eq!(engine.state().await, EngineState::Busy);

        assert!(engine.start_epoch().await.unwrap());
        let (topic, status) = harness.next_status().await;
        assert_eq!(topic, "Status.Ready");
        assert_eq!(status.epoch_number(), 1);
        assert_eq!(engine.with_component(|component| component.attempts).await, 2);
    }

    #[tokio::test]
    async fn stopped_simulation_closes_the_engine() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        harness.running().await;
        harness.next_status().await;

        let stopped = harness.generator.simulation_state(SimulationState::Stopped).unwrap();
        harness.send("SimState", stopped).await;
        for _ in 0..100 {
            if engine.state().await == EngineState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.state().await, EngineState::Stopped);
        assert!(engine.client().is_closed());

        harness.epoch(1).await;
        harness.assert_quiet().await;
        assert!(matches!(engine.start().await, Err(EngineError::Stopped)));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn send_error_uses_the_error_topic() {
        let mut harness = Harness::new().await;
        let engine = harness.engine(PassiveComponent).await;
        harness.running().await;
        harness.next_status().await;

        engine.send_error("meter offline").await.unwrap();
        let (topic, status) = harness.next_status().await;
        assert_eq!(topic, "Status.Error");
        assert_eq!(status.description(), Some("meter offline"));
        assert_eq!(status.epoch_number(), 0);
    }
}
