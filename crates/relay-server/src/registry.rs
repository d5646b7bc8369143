//! Live stream bookkeeping.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use relay_broker::SessionId;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One live client stream.
#[derive(Clone, Debug, Serialize)]
pub struct StreamEntry {
    /// Unique stream ID (UUID v7).
    pub id: String,
    /// Session the stream follows.
    pub session_id: SessionId,
    /// When the stream was opened.
    pub opened_at: DateTime<Utc>,
}

impl StreamEntry {
    /// New entry with a fresh ID, opened now.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            session_id,
            opened_at: Utc::now(),
        }
    }
}

/// Tracks every live stream, indexed by stream ID.
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, StreamEntry>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Record a stream.
    pub async fn add(&self, entry: StreamEntry) {
        let mut streams = self.streams.write().await;
        let _ = streams.insert(entry.id.clone(), entry);
    }

    /// Forget a stream. Returns the entry if it was present.
    pub async fn remove(&self, stream_id: &str) -> Option<StreamEntry> {
        self.streams.write().await.remove(stream_id)
    }

    /// Number of live streams.
    pub async fn count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Number of distinct sessions with a live stream.
    pub async fn session_count(&self) -> usize {
        let streams = self.streams.read().await;
        streams
            .values()
            .map(|s| s.session_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Live streams of one session, oldest first.
    pub async fn session_streams(&self, session_id: &str) -> Vec<StreamEntry> {
        let streams = self.streams.read().await;
        let mut found: Vec<_> = streams
            .values()
            .filter(|s| s.session_id.as_str() == session_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        found
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
