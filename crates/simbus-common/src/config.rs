//! ---
//! simbus_section: "01-core-functionality"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Shared primitives and utilities for the SimBus runtime."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// TLS protocol tags accepted for `ssl_version`.
pub const SUPPORTED_SSL_VERSIONS: &[&str] = &[
    "PROTOCOL_TLS",
    "PROTOCOL_TLS_CLIENT",
    "PROTOCOL_TLSv1_2",
    "PROTOCOL_TLSv1_3",
];

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    5672
}

fn default_ssl_version() -> String {
    "PROTOCOL_TLS".to_owned()
}

fn default_exchange() -> String {
    "simbus".to_owned()
}

fn default_exchange_durable() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_simulation_state_topic() -> String {
    "SimState".to_owned()
}

fn default_epoch_topic() -> String {
    "Epoch".to_owned()
}

fn default_status_topic() -> String {
    "Status.Ready".to_owned()
}

fn default_error_topic() -> String {
    "Status.Error".to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a SimBus process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub component: ComponentConfig,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "SIMBUS_CONFIG";
    pub const ENV_PREFIX: &str = "SIMBUS";

    /// Load configuration from an optional TOML file layered under
    /// `SIMBUS__<SECTION>__<KEY>` environment overrides.
    ///
    /// The explicit `path` wins over the `SIMBUS_CONFIG` variable. Without
    /// either, defaults plus environment overrides are used.
    pub fn load(path: Option<&Path>) -> Result<LoadedAppConfig> {
        let source = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(Self::ENV_CONFIG_PATH)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };

        let mut builder = Config::builder();
        if let Some(path) = &source {
            debug!(config_path = %path.display(), "loading configuration");
            builder = builder.add_source(
                File::from(path.clone())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("topics.other"),
        );

        let config = builder
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize::<AppConfig>()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(LoadedAppConfig { config, source })
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.bus.validate()?;
        self.component.validate()?;
        self.topics.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection and exchange settings for one bus client.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_ssl_version")]
    pub ssl_version: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_exchange_durable")]
    pub exchange_durable: bool,
    #[serde(default)]
    pub exchange_autodelete: bool,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            login: String::new(),
            password: String::new(),
            ssl: false,
            ssl_version: default_ssl_version(),
            exchange: default_exchange(),
            exchange_durable: default_exchange_durable(),
            exchange_autodelete: false,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BusConfig {
    /// Convenience constructor used by tests and embedded setups.
    pub fn for_exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("bus host must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("bus port must be non-zero"));
        }
        if self.exchange.trim().is_empty() {
            return Err(anyhow!("bus exchange name must not be empty"));
        }
        if self.ssl && !SUPPORTED_SSL_VERSIONS.contains(&self.ssl_version.as_str()) {
            return Err(anyhow!(
                "unsupported ssl_version '{}', expected one of: {}",
                self.ssl_version,
                SUPPORTED_SSL_VERSIONS.join(", ")
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow!("bus connect_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Identity of a simulation component within one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(default)]
    pub simulation_id: String,
    #[serde(default)]
    pub component_name: String,
}

impl ComponentConfig {
    pub fn new(simulation_id: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            simulation_id: simulation_id.into(),
            component_name: component_name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulation_id.trim().is_empty() {
            return Err(anyhow!("component simulation_id must not be empty"));
        }
        if self.component_name.trim().is_empty() {
            return Err(anyhow!("component component_name must not be empty"));
        }
        Ok(())
    }
}

/// Topic names a component listens and reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_simulation_state_topic")]
    pub simulation_state: String,
    #[serde(default = "default_epoch_topic")]
    pub epoch: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
    #[serde(default = "default_error_topic")]
    pub error: String,
    #[serde(default)]
    pub other: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            simulation_state: default_simulation_state_topic(),
            epoch: default_epoch_topic(),
            status: default_status_topic(),
            error: default_error_topic(),
            other: Vec::new(),
        }
    }
}

impl TopicConfig {
    /// Every topic pattern the component engine subscribes to.
    pub fn listened(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        let candidates = self
            .other
            .iter()
            .map(|topic| topic.trim())
            .chain([self.simulation_state.as_str(), self.epoch.as_str()]);
        for topic in candidates {
            if !topic.is_empty() && !topics.iter().any(|known| known == topic) {
                topics.push(topic.to_owned());
            }
        }
        topics
    }

    pub fn validate(&self) -> Result<()> {
        for (name, topic) in [
            ("simulation_state", &self.simulation_state),
            ("epoch", &self.epoch),
            ("status", &self.status),
            ("error", &self.error),
        ] {
            if topic.trim().is_empty() {
                return Err(anyhow!("topic '{}' must not be empty", name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[bus]
host = "broker.local"
port = 5671
login = "component"
password = "secret"
ssl = true
ssl_version = "PROTOCOL_TLSv1_2"
exchange = "procem"
exchange_autodelete = true
connect_timeout = 1500

[component]
simulation_id = "sim1"
component_name = "compA"

[topics]
other = ["ResourceState.#"]
"#;

    #[test]
    fn parses_toml_configuration() {
        let config: AppConfig = SAMPLE.parse().expect("valid config");
        assert_eq!(config.bus.host, "broker.local");
        assert_eq!(config.bus.port, 5671);
        assert!(config.bus.ssl);
        assert!(config.bus.exchange_durable);
        assert!(config.bus.exchange_autodelete);
        assert_eq!(config.bus.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.component.simulation_id, "sim1");
        assert_eq!(config.topics.status, "Status.Ready");
        assert_eq!(
            config.topics.listened(),
            vec!["ResourceState.#", "SimState", "Epoch"]
        );
    }

    #[test]
    fn rejects_missing_component_identity() {
        let err = "[bus]\nexchange = \"x\"\n"
            .parse::<AppConfig>()
            .expect_err("component identity required");
        assert!(err.to_string().contains("simulation_id"));
    }

    #[test]
    fn rejects_unknown_ssl_version() {
        let mut bus = BusConfig::for_exchange("x");
        bus.ssl = true;
        bus.ssl_version = "SSLv3".to_owned();
        assert!(bus.validate().is_err());
        bus.ssl = false;
        assert!(bus.validate().is_ok());
    }

    #[test]
    fn loads_configuration_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write config");
        let loaded = AppConfig::load(Some(file.path())).expect("load config");
        assert_eq!(loaded.source.as_deref(), Some(file.path()));
        assert_eq!(loaded.config.bus.exchange, "procem");
        assert_eq!(loaded.config.component.component_name, "compA");
    }
}
