// Relay configuration.
//
// `RelayConfig` has sensible defaults for every field so the relay runs with
// no config file at all. A TOML file can override any subset of fields
// (`#[serde(default)]` at every level); `main.rs` then applies CLI flags on
// top. Tests build configs in code, usually with `port: 0` so the OS picks
// a free port.
//
// Example file:
//
//   port = 8080
//   decision_process_id = "SpheroBrain"
//
//   [upstream]
//   url = "ws://localhost:8081"
//   reconnect_delay_ms = 5000
//
//   [broadcast]
//   interval_ms = 10000
//   kind = "SpheroMatrix"
//   payload = "X"

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Id the decision process is registered under when it does not name
    /// itself.
    pub decision_process_id: String,
    pub upstream: UpstreamConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8080,
            decision_process_id: "SpheroBrain".into(),
            upstream: UpstreamConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Downstream processing socket that camera frames are forwarded to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `None` disables forwarding; camera frames are then dropped.
    pub url: Option<String>,
    pub reconnect_delay_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_delay_ms: 5000,
        }
    }
}

impl UpstreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Stimulus pushed to every registered unit on a fixed interval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub kind: String,
    pub payload: Value,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            kind: "SpheroMatrix".into(),
            payload: Value::String("X".into()),
        }
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Which processing server the camera pipeline feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UpstreamMode {
    /// Face recognition server.
    Face,
    /// Scan server.
    Scan,
}

impl UpstreamMode {
    pub fn default_url(self) -> &'static str {
        match self {
            UpstreamMode::Face => "ws://localhost:8081",
            UpstreamMode::Scan => "ws://localhost:8082",
        }
    }
}

impl RelayConfig {
    /// Load a config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| RelayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.port, 8080);
        assert_eq!(config.upstream.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
            port = 9000

            [upstream]
            url = "ws://localhost:8082"

            [broadcast]
            interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.upstream.url.as_deref(), Some("ws://localhost:8082"));
        assert_eq!(config.upstream.reconnect_delay_ms, 5000);
        assert_eq!(config.broadcast.interval(), Duration::from_millis(250));
        assert_eq!(config.broadcast.kind, "SpheroMatrix");
        assert!(config.broadcast.enabled);
    }

    #[test]
    fn structured_broadcast_payload() {
        let config = RelayConfig::from_toml_str(
            r#"
            [broadcast]
            kind = "SpheroMatrix"
            payload = { pattern = "X", colour = "red" }
            "#,
        )
        .unwrap();
        assert_eq!(
            config.broadcast.payload,
            serde_json::json!({"pattern": "X", "colour": "red"})
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert!(RelayConfig::from_toml_str("port = \"eighty\"").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RelayConfig::load(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }

    #[test]
    fn mode_urls() {
        assert_eq!(UpstreamMode::Face.default_url(), "ws://localhost:8081");
        assert_eq!(UpstreamMode::Scan.default_url(), "ws://localhost:8082");
    }
}
