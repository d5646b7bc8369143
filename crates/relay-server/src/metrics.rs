//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup; a
/// second call fails because a global recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Streams started (counter).
pub const STREAMS_OPENED_TOTAL: &str = "relay_streams_opened_total";
/// Streams ended (counter, labels: reason).
pub const STREAMS_CLOSED_TOTAL: &str = "relay_streams_closed_total";
/// Live streams (gauge).
pub const STREAMS_ACTIVE: &str = "relay_streams_active";
/// Stream requests refused because the broker was unavailable (counter).
pub const STREAM_OPEN_FAILURES_TOTAL: &str = "relay_stream_open_failures_total";
/// Events written to clients (counter, labels: event).
pub const EVENTS_SENT_TOTAL: &str = "relay_events_sent_total";
/// Broker failures on established streams (counter).
pub const BROKER_ERRORS_TOTAL: &str = "relay_broker_errors_total";
/// Stream lifetime in seconds (histogram).
pub const STREAM_DURATION_SECONDS: &str = "relay_stream_duration_seconds";
