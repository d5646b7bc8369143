//! `/health` endpoint.

use std::time::{Duration, Instant};

use relay_broker::Broker;
use serde::Serialize;
use tracing::warn;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the broker answered, `"unhealthy"` otherwise.
    pub status: String,
    /// `"reachable"` or `"unreachable"`.
    pub broker: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live client streams.
    pub active_streams: usize,
    /// Distinct sessions with at least one live stream.
    pub active_sessions: usize,
}

impl HealthResponse {
    /// Whether this response is served with `200`.
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from the probe result and live counters.
pub fn health_check(
    start_time: Instant,
    broker_reachable: bool,
    streams: usize,
    sessions: usize,
) -> HealthResponse {
    let (status, broker) = if broker_reachable {
        ("ok", "reachable")
    } else {
        ("unhealthy", "unreachable")
    };
    HealthResponse {
        status: status.into(),
        broker: broker.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_streams: streams,
        active_sessions: sessions,
    }
}

/// Ping the broker, giving up after `timeout`.
pub async fn probe_broker(broker: &dyn Broker, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, broker.ping()).await {
        Ok(Ok(answered)) => answered,
        Ok(Err(e)) => {
            warn!(error = %e, "health probe failed");
            false
        }
        Err(_) => {
            warn!(?timeout, "health probe timed out");
            false
        }
    }
}
