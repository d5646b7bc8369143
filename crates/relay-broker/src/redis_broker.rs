//! Redis pub/sub broker.
//!
//! Each subscription owns a dedicated pub/sub connection; Redis requires a
//! connection in subscribe mode to do nothing else. `PING` goes over a cached
//! multiplexed connection that is rebuilt after any failure.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use tokio::sync::Mutex;
use tracing::debug;

use crate::broker::{Broker, Subscription};
use crate::errors::{BrokerError, Result};

/// Broker backed by a Redis server.
pub struct RedisBroker {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    /// Create a broker for `url` (`redis://[:password@]host:port/db`).
    ///
    /// Only parses the URL; no connection is made until first use.
    pub fn open(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn command_connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        debug!("redis command connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub: Some(pubsub),
        }))
    }

    async fn ping(&self) -> Result<bool> {
        let mut conn = self.command_connection().await?;
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) => Ok(reply == "PONG"),
            Err(e) => {
                *self.connection.lock().await = None;
                Err(BrokerError::Command(e.to_string()))
            }
        }
    }
}

/// A single Redis `SUBSCRIBE` on a dedicated connection.
pub struct RedisSubscription {
    channel: String,
    pubsub: Option<PubSub>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<String>> {
        let pubsub = self.pubsub.as_mut().ok_or(BrokerError::Closed)?;
        let mut messages = std::pin::pin!(pubsub.on_message());
        match tokio::time::timeout(timeout, messages.next()).await {
            Err(_) => Ok(None),
            // Lossy so a non-UTF-8 publish degrades to opaque text instead of ending the stream.
            Ok(Some(msg)) => Ok(Some(
                String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            )),
            Ok(None) => Err(BrokerError::Closed),
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let Some(pubsub) = self.pubsub.as_mut() else {
            return Ok(());
        };
        pubsub
            .unsubscribe(self.channel.as_str())
            .await
            .map_err(|e| BrokerError::Command(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the pub/sub handle closes its connection.
        drop(self.pubsub.take());
        Ok(())
    }
}
