//! `GET /api/v1.0/a1/stream/{session_id}`: the SSE endpoint.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, HeaderName};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_broker::SessionId;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, field, info, info_span, warn};

use crate::metrics::STREAM_OPEN_FAILURES_TOTAL;
use crate::registry::StreamEntry;
use crate::server::AppState;
use crate::stream::session::StreamSession;

/// Tells nginx-style proxies not to buffer the event stream.
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Open a stream for one client.
///
/// Subscribes before answering, so a broker outage is a `503` rather than a
/// stream that dies immediately. The subscription is opened inside the task
/// on the shutdown tracker, and that task owns it until release: a client
/// that hangs up mid-subscribe drops only the handler, and the task sees the
/// dropped receiver and closes the subscription. The session feeds the
/// response body through a bounded channel; dropping the body (client gone)
/// ends the session.
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(raw_session_id): Path<String>,
) -> Response {
    let session_id = match SessionId::new(raw_session_id) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if state.shutdown.is_shutting_down() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }

    let entry = StreamEntry::new(session_id.clone());
    let stream_id = entry.id.clone();
    let span = info_span!(
        "stream",
        stream_id = %stream_id,
        session_id = %session_id,
        channel = field::Empty
    );

    let (tx, mut rx) = mpsc::channel(state.config.event_buffer.max(1));
    let (opened_tx, opened_rx) = oneshot::channel();
    let cancel = state.shutdown.child_token();
    let registry = state.registry.clone();
    let binder = state.binder.clone();
    let stream_config = state.config.stream;
    let task_session_id = session_id.clone();
    let _ = state.shutdown.spawn(
        async move {
            registry.add(entry).await;
            match StreamSession::open(binder, task_session_id, stream_config).await {
                Ok(session) => {
                    let _ = Span::current().record("channel", session.channel());
                    info!("stream opened");
                    let _ = opened_tx.send(Ok(()));
                    let _ = session.run(tx, cancel).await;
                    let _ = registry.remove(&stream_id).await;
                }
                Err(e) => {
                    let _ = registry.remove(&stream_id).await;
                    let _ = opened_tx.send(Err(e));
                }
            }
        }
        .instrument(span),
    );

    match opened_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counter!(STREAM_OPEN_FAILURES_TOTAL).increment(1);
            warn!(session_id = %session_id, error = %e, "stream open failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
        }
        Err(_) => {
            counter!(STREAM_OPEN_FAILURES_TOTAL).increment(1);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "stream task ended");
        }
    }

    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(event.to_sse());
        }
    };

    (
        [
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
        ],
        Sse::new(events),
    )
        .into_response()
}
