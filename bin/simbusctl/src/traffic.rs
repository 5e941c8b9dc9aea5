//! ---
//! simbus_section: "05-networking-external-interfaces"
//! simbus_subsection: "binary"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Send, listen and record subcommands."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args};
use serde_json::Value as JsonValue;
use simbus_bus::{BusClient, Inbound};
use simbus_common::SystemClock;
use simbus_msg::{Message, Registry};
use simbus_persistence::{ArchiveListener, EventLogStore, MessageStore};
use tokio::signal;
use tracing::info;

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("payload").required(true).args(["file", "json"])))]
pub struct SendArgs {
    #[arg(long, help = "Routing key to publish on")]
    topic: String,
    #[arg(long, value_name = "FILE", help = "Read the message attributes from a JSON file")]
    file: Option<PathBuf>,
    #[arg(long, value_name = "JSON", help = "Message attributes as a JSON object")]
    json: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    #[arg(long = "topic", required = true, value_name = "PATTERN", help = "Topic pattern, repeatable")]
    topics: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[arg(long = "topic", default_value = "#", value_name = "PATTERN", help = "Topic pattern, repeatable")]
    topics: Vec<String>,
    #[arg(long, value_name = "FILE", help = "Event log to append to")]
    output: PathBuf,
}

/// Payload ready for publishing.
enum Outgoing {
    Message(Box<Message>),
    Raw(Vec<u8>),
}

fn prepare(registry: &Registry, value: JsonValue) -> Result<Outgoing> {
    let JsonValue::Object(attributes) = value else {
        bail!("message payload must be a JSON object");
    };
    let tag = attributes
        .get("Type")
        .and_then(JsonValue::as_str)
        .map(str::to_owned);
    match tag {
        Some(tag) if registry.is_registered(&tag) => {
            let message = registry
                .build(&tag, attributes)
                .with_context(|| format!("invalid {tag} message"))?;
            Ok(Outgoing::Message(Box::new(message)))
        }
        _ => Ok(Outgoing::Raw(serde_json::to_vec(&attributes)?)),
    }
}

pub async fn send(client: &BusClient, args: SendArgs) -> Result<()> {
    let text = match (&args.file, &args.json) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(json)) => json.clone(),
        (None, None) => bail!("either --file or --json is required"),
    };
    let value: JsonValue = serde_json::from_str(&text).context("payload is not valid JSON")?;
    let outgoing = prepare(client.registry(), value)?;

    client.open().await?;
    match outgoing {
        Outgoing::Message(message) => {
            client.publish_message(&args.topic, &message).await?;
            info!(topic = %args.topic, message_id = %message.message_id(), "message sent");
        }
        Outgoing::Raw(payload) => {
            client.publish(&args.topic, payload).await?;
            info!(topic = %args.topic, "untyped message sent");
        }
    }
    client.close().await?;
    Ok(())
}

pub async fn listen(client: &BusClient, args: ListenArgs) -> Result<()> {
    client.open().await?;
    client
        .subscribe(&args.topics, |inbound: Inbound, topic: String| async move {
            let rendered = match &inbound {
                Inbound::Message(message) => serde_json::to_string(message)?,
                Inbound::Untyped(attributes) => serde_json::to_string(attributes)?,
                Inbound::Rejected(error) => format!("<rejected: {error}>"),
            };
            println!("{topic} {rendered}");
            Ok::<(), anyhow::Error>(())
        })
        .await?;
    info!(topics = ?args.topics, "listening, press Ctrl-C to stop");
    signal::ctrl_c().await?;
    client.close().await?;
    Ok(())
}

pub async fn record(client: &BusClient, args: RecordArgs) -> Result<()> {
    let store = Arc::new(
        EventLogStore::open(&args.output, SystemClock::shared())
            .with_context(|| format!("failed to open {}", args.output.display()))?,
    );
    client.open().await?;
    let sink: Arc<dyn MessageStore> = store.clone();
    client.subscribe(&args.topics, ArchiveListener::new(sink)).await?;
    info!(
        topics = ?args.topics,
        output = %args.output.display(),
        "recording, press Ctrl-C to stop"
    );
    signal::ctrl_c().await?;
    client.close().await?;
    store.flush().await?;
    Ok(())
}
