//! The broker seam consumed by the stream session.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// A pub/sub broker client, shared by every stream.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a dedicated subscription on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    /// Liveness probe. `Ok(true)` means the broker answered.
    async fn ping(&self) -> Result<bool>;
}

/// One live subscription on one channel, owned by exactly one stream.
#[async_trait]
pub trait Subscription: Send {
    /// Channel this subscription listens on.
    fn channel(&self) -> &str;

    /// Wait at most `timeout` for the next payload.
    ///
    /// `Ok(None)` means the window elapsed with nothing delivered.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Stop delivery on the channel.
    async fn unsubscribe(&mut self) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}
