//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "test"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Bus client behaviour across connections on the in-process broker."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use simbus_bus::{BusClient, BusError, BusMetricsExporter, Inbound, MemoryBroker};
use simbus_common::time::FixedClock;
use simbus_common::BusConfig;
use simbus_msg::{Message, MessageGenerator, Registry, SimulationState};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn registry() -> Arc<Registry> {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    Arc::new(Registry::with_defaults(Arc::new(clock)))
}

async fn open_client(broker: &MemoryBroker, registry: &Arc<Registry>) -> BusClient {
    let client = BusClient::new(
        BusConfig::for_exchange("integration"),
        Arc::new(broker.clone()),
        Arc::clone(registry),
    );
    client.open().await.expect("open client");
    client
}

#[tokio::test]
async fn typed_messages_cross_connections() {
    let broker = MemoryBroker::new();
    let registry = registry();
    let manager = open_client(&broker, &registry).await;
    let component = open_client(&broker, &registry).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    component
        .subscribe(&["SimState".to_owned()], move |inbound: Inbound, _topic: String| {
            let tx = tx.clone();
            async move {
                if let Some(message) = inbound.into_message() {
                    tx.send(message)?;
                }
                Ok::<(), anyhow::Error>(())
            }
        })
        .await
        .unwrap();

    let mut generator = MessageGenerator::new("sim1", "manager", Arc::clone(registry.clock()));
    let running: Message = generator
        .simulation_state(SimulationState::Running)
        .unwrap()
        .into();
    manager.publish_message("SimState", &running).await.unwrap();

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, running);
    assert_eq!(manager.stats().published, 1);
    assert_eq!(component.stats().delivered, 1);
}

#[tokio::test]
async fn close_from_inside_a_handler_stops_delivery() {
    let broker = MemoryBroker::new();
    let registry = registry();
    let publisher = open_client(&broker, &registry).await;
    let listener = open_client(&broker, &registry).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let closing = listener.clone();
    listener
        .subscribe(&["#".to_owned()], move |_inbound: Inbound, topic: String| {
            let tx = tx.clone();
            let closing = closing.clone();
            async move {
                tx.send(topic.clone())?;
                if topic == "stop" {
                    closing.close().await?;
                }
                Ok::<(), anyhow::Error>(())
            }
        })
        .await
        .unwrap();

    publisher.publish("first", "{}").await.unwrap();
    publisher.publish("stop", "{}").await.unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().as_deref(), Some("first"));
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().as_deref(), Some("stop"));

    publisher.publish("after", "{}").await.unwrap();
    // the handler owns the only sender, so the channel ends once the consumer stops
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
    assert!(listener.is_closed());
    assert_eq!(broker.queue_count("integration"), 0);
}

#[tokio::test]
async fn failing_handlers_keep_the_subscription_alive() {
    let broker = MemoryBroker::new();
    let registry = registry();
    let metrics_registry = prometheus::Registry::new();
    let metrics = Arc::new(BusMetricsExporter::register(&metrics_registry).unwrap());
    let client = open_client(&broker, &registry).await.with_metrics(metrics);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(&["Work.*".to_owned()], move |_inbound: Inbound, topic: String| {
            let tx = tx.clone();
            async move {
                if topic == "Work.bad" {
                    anyhow::bail!("cannot process {topic}");
                }
                tx.send(topic)?;
                Ok::<(), anyhow::Error>(())
            }
        })
        .await
        .unwrap();

    client.publish("Work.bad", "{}").await.unwrap();
    client.publish("Work.good", "{}").await.unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().as_deref(), Some("Work.good"));

    let stats = client.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.handler_failures, 1);
    let failures = metrics_registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "simbus_handler_failures_total")
        .expect("failure counter");
    assert_eq!(failures.get_metric()[0].get_counter().get_value(), 1.0);
}

#[tokio::test]
async fn connection_errors_surface_from_open() {
    let broker = MemoryBroker::with_credentials("component", "secret");
    let client = BusClient::new(
        BusConfig::for_exchange("integration"),
        Arc::new(broker),
        registry(),
    );
    assert!(matches!(client.open().await, Err(BusError::Connection(_))));
    assert!(matches!(
        client.subscribe(&["#".to_owned()], |_: Inbound, _: String| async { Ok::<(), anyhow::Error>(()) }).await,
        Err(BusError::NotOpen)
    ));
}
