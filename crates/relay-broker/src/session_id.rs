//! Session identifiers and the channel names derived from them.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Prefix of every session channel on the broker.
pub const CHANNEL_PREFIX: &str = "chat_stream:";

/// Rejected session identifier.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionIdError {
    /// The identifier was the empty string.
    #[error("session id must not be empty")]
    Empty,
}

/// Opaque identifier of a logical conversation.
///
/// The only constraint is non-emptiness; the format is the publisher's business.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw identifier, rejecting the empty string.
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(SessionIdError::Empty);
        }
        Ok(Self(raw))
    }

    /// The identifier as supplied.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker channel this session publishes on.
    pub fn channel_name(&self) -> String {
        channel_name(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the channel name for a session id. Pure and injective.
pub fn channel_name(session_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{session_id}")
}
