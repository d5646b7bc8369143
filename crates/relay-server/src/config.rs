//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

use crate::stream::session::StreamConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Events buffered per stream before the session waits on the client.
    pub event_buffer: usize,
    /// Per-stream timing.
    pub stream: StreamConfig,
    /// Timeout of the `/health` broker probe.
    pub health_timeout: Duration,
    /// How long shutdown waits for streams to release their subscriptions.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            event_buffer: 64,
            stream: StreamConfig::default(),
            health_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            event_buffer: settings.server.event_buffer,
            stream: StreamConfig {
                poll_timeout: settings.stream.poll_timeout(),
                ping_interval: settings.stream.ping_interval(),
            },
            health_timeout: settings.health.ping_timeout(),
            shutdown_timeout: settings.server.shutdown_timeout(),
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
