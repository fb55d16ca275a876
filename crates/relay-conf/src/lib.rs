//! Configuration loading for the relay broker and worker runtimes.
//!
//! # Config file locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/relay-broker/config.toml` (system)
//! 2. `~/.config/relay-broker/config.toml` (user)
//! 3. `./relay-broker.toml` (local override)
//! 4. Environment variables (`RELAY_*`)
//!
//! # Example config
//!
//! ```toml
//! [broker]
//! bind = "tcp://0.0.0.0:5555"
//! heartbeat_interval_ms = 1000
//! heartbeat_liveness = 3
//! poll_interval_ms = 1000
//! request_timeout_ms = 5000
//!
//! [worker]
//! connect = "tcp://127.0.0.1:5555"
//! service = "echo"
//! reconnect_delay_ms = 2500
//! ```

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Broker-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub bind: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_liveness: u32,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            bind: "tcp://0.0.0.0:5555".to_string(),
            heartbeat_interval_ms: 1000,
            heartbeat_liveness: 3,
            poll_interval_ms: 1000,
            request_timeout_ms: 5000,
        }
    }
}

/// Worker-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub connect: String,
    pub service: String,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_liveness: u32,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            connect: "tcp://127.0.0.1:5555".to_string(),
            service: String::new(),
            heartbeat_interval_ms: 1000,
            heartbeat_liveness: 3,
            poll_interval_ms: 1000,
            reconnect_delay_ms: 2500,
        }
    }
}

/// Complete relay configuration, combining both sides. A process typically
/// only uses one half, but both load from the same file/env surface so a
/// single config file can describe a broker and its co-located workers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RelayConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl RelayConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/relay-broker/config.toml`
    /// 3. `~/.config/relay-broker/config.toml`
    /// 4. `./relay-broker.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, optionally preferring an explicit file path over
    /// the local `./relay-broker.toml` override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::try_from(&RelayConfig::default())
            .expect("default RelayConfig always serializes to TOML");

        for path in discover_config_files(config_path) {
            let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            let file_value: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
            merge_toml(&mut merged, file_value);
        }

        let merged_toml = toml::to_string(&merged).expect("merged config value always serializes");
        let mut config: RelayConfig = toml::from_str(&merged_toml).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<merged configuration>"),
            message: e.to_string(),
        })?;

        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Serialize to TOML. Uses the `toml` crate directly; unlike a
    /// hand-assembled string this stays correct as fields are added.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Discover config files in standard locations, in load order. Only
/// existing files are returned.
fn discover_config_files(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/relay-broker/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("relay-broker/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("relay-broker.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay `overlay` onto `base` field-by-field: a table key present in
/// `overlay` recurses (or replaces, if `base` lacks it); any other value
/// replaces `base` outright. Keys `overlay` doesn't mention are left alone,
/// so a narrower, later file never resets fields only an earlier file set.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(v) = env::var("RELAY_BROKER_BIND") {
        config.broker.bind = v;
    }
    if let Ok(v) = env::var("RELAY_HEARTBEAT_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.broker.heartbeat_interval_ms = n;
            config.worker.heartbeat_interval_ms = n;
        }
    }
    if let Ok(v) = env::var("RELAY_HEARTBEAT_LIVENESS") {
        if let Ok(n) = v.parse() {
            config.broker.heartbeat_liveness = n;
            config.worker.heartbeat_liveness = n;
        }
    }
    if let Ok(v) = env::var("RELAY_POLL_INTERVAL_MS") {
        if let Ok(n) = v.parse() {
            config.broker.poll_interval_ms = n;
            config.worker.poll_interval_ms = n;
        }
    }
    if let Ok(v) = env::var("RELAY_REQUEST_TIMEOUT_MS") {
        if let Ok(n) = v.parse() {
            config.broker.request_timeout_ms = n;
        }
    }
    if let Ok(v) = env::var("RELAY_WORKER_CONNECT") {
        config.worker.connect = v;
    }
    if let Ok(v) = env::var("RELAY_WORKER_SERVICE") {
        config.worker.service = v;
    }
    if let Ok(v) = env::var("RELAY_RECONNECT_DELAY_MS") {
        if let Ok(n) = v.parse() {
            config.worker.reconnect_delay_ms = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.broker.bind, "tcp://0.0.0.0:5555");
        assert_eq!(config.broker.heartbeat_liveness, 3);
        assert_eq!(config.worker.reconnect_delay_ms, 2500);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let config = RelayConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed: RelayConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_defaults_with_no_files() {
        let config = RelayConfig::load_from(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.broker.bind, "tcp://0.0.0.0:5555");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
bind = "tcp://0.0.0.0:9999"
heartbeat_liveness = 5

[worker]
service = "render"
"#
        )
        .unwrap();

        let config = RelayConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.broker.bind, "tcp://0.0.0.0:9999");
        assert_eq!(config.broker.heartbeat_liveness, 5);
        assert_eq!(config.worker.service, "render");
        // Unset fields keep their defaults.
        assert_eq!(config.worker.reconnect_delay_ms, 2500);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not = [valid").unwrap();
        let err = RelayConfig::load_from(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn later_file_overlays_fields_without_resetting_earlier_ones() {
        let mut merged = toml::Value::try_from(&RelayConfig::default()).unwrap();

        let first: toml::Value = toml::from_str(
            r#"
            [broker]
            bind = "tcp://0.0.0.0:9999"
            heartbeat_liveness = 5
            "#,
        )
        .unwrap();
        merge_toml(&mut merged, first);

        // A later, narrower file only mentions [worker] - it must not wipe
        // the [broker] fields the first file set.
        let second: toml::Value = toml::from_str(
            r#"
            [worker]
            service = "render"
            "#,
        )
        .unwrap();
        merge_toml(&mut merged, second);

        let config: RelayConfig = toml::from_str(&toml::to_string(&merged).unwrap()).unwrap();
        assert_eq!(config.broker.bind, "tcp://0.0.0.0:9999", "earlier file's field must survive a later, narrower file");
        assert_eq!(config.broker.heartbeat_liveness, 5);
        assert_eq!(config.worker.service, "render");
        assert_eq!(config.worker.reconnect_delay_ms, 2500, "fields untouched by either file keep compiled defaults");
    }
}
