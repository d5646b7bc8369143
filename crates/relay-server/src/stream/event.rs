//! Outbound SSE events and the decoding of broker payloads into them.

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use relay_broker::SessionId;
use serde_json::{Value, json};

/// Payload that ends every stream on its channel. Never forwarded.
pub const STOP_SENTINEL: &str = "__STOP__";

/// Event name a client sees when none is given.
pub const DEFAULT_EVENT: &str = "message";

/// One event sent to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEvent {
    /// `None` omits the `event:` line, which clients read as `message`.
    name: Option<String>,
    data: String,
}

impl OutboundEvent {
    /// First event of every stream: which channel the client is bound to.
    pub fn connected(session_id: &SessionId, channel: &str) -> Self {
        Self::named(
            "connected",
            json!({ "session_id": session_id, "channel": channel }).to_string(),
        )
    }

    /// Keep-alive carrying the wall-clock time in fractional Unix seconds.
    pub fn ping(now: DateTime<Utc>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let time = now.timestamp_micros() as f64 / 1_000_000.0;
        Self::named("ping", json!({ "time": time }).to_string())
    }

    /// Terminal error notice. Carries only the display message.
    pub fn error(message: &str) -> Self {
        Self::named("error", json!({ "error": message }).to_string())
    }

    /// Frame a broker payload.
    ///
    /// A JSON object is sent under its `type` (or `message`) with the raw
    /// payload as data, byte for byte. Anything else is sent as opaque data
    /// without an event name.
    pub fn from_payload(payload: String) -> Self {
        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(fields)) => {
                let name = fields
                    .get("type")
                    .and_then(Value::as_str)
                    .filter(|t| is_valid_event_name(t))
                    .unwrap_or(DEFAULT_EVENT)
                    .to_string();
                Self {
                    name: Some(name),
                    data: payload,
                }
            }
            _ => Self {
                name: None,
                data: payload,
            },
        }
    }

    fn named(name: &str, data: String) -> Self {
        Self {
            name: Some(name.to_string()),
            data,
        }
    }

    /// Event name as the client will see it.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_EVENT)
    }

    /// Whether an `event:` line is written.
    pub fn has_explicit_name(&self) -> bool {
        self.name.is_some()
    }

    /// Data payload.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Bounded label for metrics; custom `type` values collapse to `custom`.
    pub fn kind(&self) -> &'static str {
        match self.name() {
            "connected" => "connected",
            "ping" => "ping",
            "error" => "error",
            DEFAULT_EVENT => DEFAULT_EVENT,
            _ => "custom",
        }
    }

    /// Convert to an axum SSE event.
    ///
    /// Line breaks of any style become separate `data:` lines, which is how
    /// SSE clients reassemble multi-line payloads.
    pub fn to_sse(&self) -> Event {
        let data = if self.data.contains('\r') {
            self.data.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            self.data.clone()
        };
        // Fields are written in call order; `event:` goes before `data:`.
        let event = match &self.name {
            Some(name) => Event::default().event(name),
            None => Event::default(),
        };
        event.data(data)
    }
}

/// SSE field values cannot carry line breaks, and an empty name is meaningless.
fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\r', '\n'])
}
