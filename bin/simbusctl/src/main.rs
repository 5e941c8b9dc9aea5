//! ---
//! simbus_section: "05-networking-external-interfaces"
//! simbus_subsection: "binary"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Operator CLI for interacting with a SimBus exchange."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use simbus_bus::{AmqpConnector, BusClient};
use simbus_common::{init_tracing, AppConfig, SystemClock};
use simbus_msg::Registry;
use tracing::info;

mod component;
mod traffic;

#[derive(Debug, Parser)]
#[command(author, version, about = "SimBus operator utility", long_about = None)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SIMBUS_CONFIG",
        help = "Path to configuration file"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Validate and publish one message")]
    Send(traffic::SendArgs),
    #[command(about = "Print every delivery on the given topics until Ctrl-C")]
    Listen(traffic::ListenArgs),
    #[command(about = "Archive the given topics to an event log until Ctrl-C")]
    Record(traffic::RecordArgs),
    #[command(about = "Run a component with the default hooks until the simulation stops")]
    Component,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load(cli.config.as_deref())?;
    let config = loaded.config;
    init_tracing("simbusctl", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("configuration loaded from defaults and environment"),
    }

    let registry = Arc::new(Registry::with_defaults(SystemClock::shared()));
    let client = BusClient::new(config.bus.clone(), Arc::new(AmqpConnector), registry);

    match cli.command {
        Commands::Send(args) => traffic::send(&client, args).await,
        Commands::Listen(args) => traffic::listen(&client, args).await,
        Commands::Record(args) => traffic::record(&client, args).await,
        Commands::Component => component::run(config, client).await,
    }
}
