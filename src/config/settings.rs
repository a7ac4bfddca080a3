use config::ConfigError;
use serde::Deserialize;

/// Top-level configuration settings for the gateway.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub history: HistorySettings,
    pub topics: TopicSettings,
    pub log: LogSettings,
}

/// Listener addresses. The WebSocket and HTTP surfaces bind separate ports on
/// the same host.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
}

/// Per-connection limits and liveness timing.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub heartbeat_interval_ms: u64,
    pub max_buffered_bytes: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    Memory,
    Sled,
}

/// Metrics/history store selection. `max_events` bounds each per-client list
/// and is the largest page a `last_n` request can return.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HistorySettings {
    pub backend: HistoryBackend,
    pub path: String,
    pub max_events: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicSettings {
    /// Create `client:{id}:{kind}` topics on first ingested event instead of
    /// requiring them to be registered up front.
    pub auto_create: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Anything left out is filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub history: Option<PartialHistorySettings>,
    pub topics: Option<PartialTopicSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub ws_port: Option<u16>,
    pub http_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialSessionSettings {
    pub heartbeat_interval_ms: Option<u64>,
    pub max_buffered_bytes: Option<usize>,
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialHistorySettings {
    pub backend: Option<HistoryBackend>,
    pub path: Option<String>,
    pub max_events: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialTopicSettings {
    pub auto_create: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                ws_port: 4001,
                http_port: 4000,
            },
            session: SessionSettings::default(),
            history: HistorySettings {
                backend: HistoryBackend::Memory,
                path: "eventgate_db".to_string(),
                max_events: 100,
            },
            topics: TopicSettings { auto_create: false },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        if session.heartbeat_interval_ms == 0 {
            return Err(invalid("session.heartbeat_interval_ms"));
        }
        if session.max_buffered_bytes == 0 {
            return Err(invalid("session.max_buffered_bytes"));
        }
        if session.max_in_flight == 0 {
            return Err(invalid("session.max_in_flight"));
        }
        Ok(())
    }
}

fn invalid(key: &str) -> ConfigError {
    ConfigError::Message(format!("{key} must be greater than zero"))
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            max_buffered_bytes: 1024 * 1024,
            max_in_flight: 256,
        }
    }
}

impl PartialSettings {
    /// Overlay the values that were provided on top of `base`.
    pub fn merge_into(self, base: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let session = self.session.unwrap_or_default();
        let history = self.history.unwrap_or_default();
        let topics = self.topics.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(base.server.host),
                ws_port: server.ws_port.unwrap_or(base.server.ws_port),
                http_port: server.http_port.unwrap_or(base.server.http_port),
            },
            session: SessionSettings {
                heartbeat_interval_ms: session
                    .heartbeat_interval_ms
                    .unwrap_or(base.session.heartbeat_interval_ms),
                max_buffered_bytes: session
                    .max_buffered_bytes
                    .unwrap_or(base.session.max_buffered_bytes),
                max_in_flight: session.max_in_flight.unwrap_or(base.session.max_in_flight),
            },
            history: HistorySettings {
                backend: history.backend.unwrap_or(base.history.backend),
                path: history.path.unwrap_or(base.history.path),
                max_events: history.max_events.unwrap_or(base.history.max_events),
            },
            topics: TopicSettings {
                auto_create: topics.auto_create.unwrap_or(base.topics.auto_create),
            },
            log: LogSettings {
                level: log.level.unwrap_or(base.log.level),
            },
        }
    }
}
