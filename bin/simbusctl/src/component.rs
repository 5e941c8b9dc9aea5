//! ---
//! simbus_section: "05-networking-external-interfaces"
//! simbus_subsection: "binary"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Runs a component with the default hooks."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use simbus_bus::BusClient;
use simbus_common::AppConfig;
use simbus_sim::{ComponentEngine, EngineState, PassiveComponent};
use tokio::signal;
use tracing::{info, warn};

const STATE_POLL: Duration = Duration::from_millis(250);

pub async fn run(config: AppConfig, client: BusClient) -> Result<()> {
    let engine = ComponentEngine::new(config.component, config.topics, client, PassiveComponent);
    engine.start().await?;
    info!(
        simulation_id = %engine.simulation_id(),
        component = %engine.component_name(),
        "component running, waiting for the simulation"
    );

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                warn!("interrupted, stopping component");
                break;
            }
            _ = tokio::time::sleep(STATE_POLL) => {
                if engine.state().await == EngineState::Stopped {
                    break;
                }
            }
        }
    }
    engine.stop().await?;
    info!(completed_epoch = ?engine.completed_epoch().await, "component stopped");
    Ok(())
}
