//! Configuration resolution for rearlink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/rearlink/settings.json`)
//! 3. Project config (`.rearlink/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete rearlink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            display: DisplaySettings::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// How to reach the privilege broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Unix socket the broker listens on. `None` means [`default_socket_path`].
    pub socket_path: Option<PathBuf>,
    /// Identity announced in the handshake.
    pub client_id: String,
    /// Bound on establishing the link plus the handshake.
    pub connect_timeout_ms: u64,
    /// Bound on a single invocation round-trip.
    pub invoke_timeout_ms: u64,
    /// Delay before the single retry of a failed write.
    pub retry_delay_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            client_id: "rearlink".to_string(),
            connect_timeout_ms: 3_000,
            invoke_timeout_ms: 10_000,
            retry_delay_ms: 100,
        }
    }
}

impl BrokerSettings {
    /// Socket path with the platform default filled in.
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Display topology settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Logical id of the rear display.
    pub rear_display_id: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self { rear_display_id: 1 }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    load_config_from(global_config_path().as_deref(), project_dir, |key| {
        std::env::var(key).ok()
    })
}

/// Resolve configuration from an explicit global file, project directory
/// and environment lookup.
///
/// Files are merged key by key, so a later file only overrides the keys it
/// actually sets.
pub fn load_config_from(
    global_path: Option<&Path>,
    project_dir: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    let project_path = project_dir.map(|dir| dir.join(".rearlink").join("settings.json"));
    for path in global_path.into_iter().chain(project_path.as_deref()) {
        if path.exists() {
            merge_json_values(&mut merged, read_config_value(path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))?;
    apply_env_overrides(&mut config, lookup);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rearlink").join("settings.json"))
}

/// Default broker socket: the user runtime dir when there is one, else the temp dir.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir().map_or_else(
        || std::env::temp_dir().join("rearlink-broker.sock"),
        |p| p.join("rearlink").join("broker.sock"),
    )
}

/// Read one settings file, checking it against [`Config`] before merging.
fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    Config::deserialize(&value).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(value)
}

/// Overlay `source` onto `target`; nested objects merge, anything else replaces.
fn merge_json_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(slot) => merge_json_values(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Apply `REARLINK_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("REARLINK_SOCKET") {
        config.broker.socket_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("REARLINK_CLIENT_ID") {
        config.broker.client_id = val;
    }
    if let Some(n) = lookup("REARLINK_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.broker.connect_timeout_ms = n;
    }
    if let Some(n) = lookup("REARLINK_INVOKE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.broker.invoke_timeout_ms = n;
    }
    if let Some(val) = lookup("REARLINK_LOG_LEVEL") {
        config.log_level = val;
    }
}
