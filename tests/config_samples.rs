//! ---
//! simbus_section: "15-testing-qa-runbook"
//! simbus_subsection: "integration-tests"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Checks that the shipped configuration samples load."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use simbus_common::{AppConfig, LogFormat};

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_parses_and_validates() {
    let config: AppConfig = read("configs/simbus.example.toml")
        .parse()
        .expect("sample config parses");
    config.validate().expect("sample config is valid");

    assert_eq!(config.bus.exchange, "procem.simbus");
    assert_eq!(config.bus.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.component.component_name, "battery-1");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(
        config.topics.listened(),
        vec!["ResourceState.#", "SimState", "Epoch"]
    );
}
