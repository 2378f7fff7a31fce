use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the WebSocket server, the broker and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
}

/// Transport the server exposes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ws,
    Sockjs,
}

/// Configuration settings for the server.
///
/// Defines where the WebSocket endpoint listens and how many clients it
/// accepts (`0` = unlimited).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub protocol: Protocol,
    pub max_connections: usize,
}

/// Configuration settings for the broker.
///
/// `heartbeat` is `[send_ms, receive_ms]`: how often the broker is willing
/// to ping clients and how often it wants to hear from them. `0` disables a
/// direction.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub server_name: String,
    pub heartbeat: [u64; 2],
    pub heartbeat_error_margin_ms: u64,
}

impl BrokerSettings {
    pub fn heartbeat_error_margin(&self) -> Duration {
        Duration::from_millis(self.heartbeat_error_margin_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub protocol: Option<Protocol>,
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub server_name: Option<String>,
    pub heartbeat: Option<[u64; 2]>,
    pub heartbeat_error_margin_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Settings {
    /// Fill the gaps of a partial configuration with defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                path: server.path.unwrap_or(default.server.path),
                protocol: server.protocol.unwrap_or(default.server.protocol),
                max_connections: server
                    .max_connections
                    .unwrap_or(default.server.max_connections),
            },
            broker: BrokerSettings {
                server_name: broker.server_name.unwrap_or(default.broker.server_name),
                heartbeat: broker.heartbeat.unwrap_or(default.broker.heartbeat),
                heartbeat_error_margin_ms: broker
                    .heartbeat_error_margin_ms
                    .unwrap_or(default.broker.heartbeat_error_margin_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }

    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.protocol == Protocol::Sockjs {
            return Err(ConfigError::Message(
                "server.protocol 'sockjs' is not supported, use 'ws'".to_string(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "server.path must start with '/', got '{}'",
                self.server.path
            )));
        }
        Ok(())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 61614,
            path: "/stomp".to_string(),
            protocol: Protocol::Ws,
            max_connections: 1000,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            server_name: format!("STOMP-RS/{}", env!("CARGO_PKG_VERSION")),
            heartbeat: [10_000, 10_000],
            heartbeat_error_margin_ms: 1000,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            log: LogSettings::default(),
        }
    }
}
