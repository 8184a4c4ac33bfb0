//! Client configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::serde_utils::{duration_secs, option_duration_secs};

/// Configuration for a pinus client connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub address: String,

    /// Client type announced in the handshake
    pub client_type: String,

    /// Client version announced in the handshake
    pub client_version: String,

    /// Connection timeout, covering TCP connect and handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long a request may wait for its response
    #[serde(
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,

    /// Application payload sent as the handshake `user` object
    pub handshake_user: Map<String, Value>,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3010".to_string(),
            client_type: "rust-tcp".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            handshake_user: Map::new(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ClientConfig = toml::from_str(
            r#"
address = "game.example.com:3014"
request_timeout = 5

[handshake_user]
token = "abc"
"#,
        )
        .unwrap();

        assert_eq!(config.address, "game.example.com:3014");
        assert_eq!(config.client_type, "rust-tcp");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.handshake_user["token"], "abc");
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn test_backoff_table() {
        let config: ClientConfig = toml::from_str(
            r#"
[backoff]
initial = 2
max = 30
"#,
        )
        .unwrap();

        assert_eq!(config.backoff.initial, Duration::from_secs(2));
        assert_eq!(config.backoff.max, Duration::from_secs(30));
        assert_eq!(config.backoff.multiplier, 2.0);
    }
}
