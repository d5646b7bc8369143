//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial. Missing fields get their default value.

use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Redis broker connection.
    pub redis: RedisSettings,
    /// Per-stream timing.
    pub stream: StreamSettings,
    /// `/health` probe behaviour.
    pub health: HealthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.poll_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.pollTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.stream.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.pingIntervalSecs must be greater than zero".into(),
            ));
        }
        if self.server.event_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.eventBuffer must be greater than zero".into(),
            ));
        }
        if self.health.ping_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "health.pingTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.redis.db < 0 {
            return Err(SettingsError::InvalidValue(format!(
                "redis.db must not be negative, got {}",
                self.redis.db
            )));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Outbound events buffered per stream before the session waits on the client.
    pub event_buffer: usize,
    /// Seconds to wait for open streams to release their subscriptions on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5100,
            event_buffer: 64,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Redis connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSettings {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// Password. An empty string connects without `AUTH`.
    pub password: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: "redis".to_string(),
        }
    }
}

impl RedisSettings {
    /// Connection URL in the `redis://` scheme.
    ///
    /// The password is percent-encoded so reserved characters survive URL parsing.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            let password = utf8_percent_encode(&self.password, NON_ALPHANUMERIC);
            format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            )
        }
    }

    /// Same as [`url`](Self::url) with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        if self.password.is_empty() {
            self.url()
        } else {
            format!("redis://:***@{}:{}/{}", self.host, self.port, self.db)
        }
    }
}

/// Per-stream timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Bounded wait for the next broker message, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Silence after which a `ping` event is emitted, in seconds.
    pub ping_interval_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            ping_interval_secs: 30,
        }
    }
}

impl StreamSettings {
    /// Poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Keep-alive interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// `/health` probe behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// Upper bound on the broker `PING`, in milliseconds.
    pub ping_timeout_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 2000,
        }
    }
}

impl HealthSettings {
    /// Ping timeout as a [`Duration`].
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
