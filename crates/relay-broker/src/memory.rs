//! In-process fan-out broker.
//!
//! Delivers every publish to every subscriber currently registered on the
//! channel, like Redis pub/sub. Used by tests and by `--broker memory` for
//! local runs without Redis.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::{Broker, Subscription};
use crate::errors::{BrokerError, Result};

/// What a subscriber receives.
#[derive(Debug)]
enum Delivery {
    Message(String),
    Fault(String),
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Inner {
    channels: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    closes: AtomicUsize,
}

impl Inner {
    fn remove(&self, channel: &str, id: u64) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                let _ = channels.remove(channel);
            }
        }
    }

    fn deliver(&self, channel: &str, make: impl Fn() -> Delivery) -> usize {
        let channels = self.channels.lock();
        let Some(subs) = channels.get(channel) else {
            return 0;
        };
        subs.iter().filter(|s| s.tx.send(make()).is_ok()).count()
    }
}

/// Lifetime counters, for asserting cleanup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBrokerStats {
    /// Successful subscribe calls.
    pub subscribes: usize,
    /// Unsubscribe calls.
    pub unsubscribes: usize,
    /// Close calls.
    pub closes: usize,
}

/// In-process pub/sub broker. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Create an empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` to every current subscriber of `channel`.
    ///
    /// Returns the number of subscribers it was delivered to.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        let payload = payload.into();
        let delivered = self
            .inner
            .deliver(channel, || Delivery::Message(payload.clone()));
        debug!(channel, delivered, "memory broker publish");
        delivered
    }

    /// Make every current subscriber of `channel` fail its next receive.
    pub fn inject_fault(&self, channel: &str, message: impl Into<String>) -> usize {
        let message = message.into();
        self.inner
            .deliver(channel, || Delivery::Fault(message.clone()))
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Toggle reachability. An unreachable broker fails `ping` and `subscribe`;
    /// subscriptions already open keep working.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Snapshot of the lifetime counters.
    pub fn stats(&self) -> MemoryBrokerStats {
        MemoryBrokerStats {
            subscribes: self.inner.subscribes.load(Ordering::SeqCst),
            unsubscribes: self.inner.unsubscribes.load(Ordering::SeqCst),
            closes: self.inner.closes.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("memory broker unreachable".into()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        let _ = self.inner.subscribes.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySubscription {
            id,
            channel: channel.to_string(),
            rx,
            inner: self.inner.clone(),
        }))
    }

    async fn ping(&self) -> Result<bool> {
        Ok(!self.inner.unreachable.load(Ordering::SeqCst))
    }
}

/// Subscription handed out by [`MemoryBroker`].
pub struct MemorySubscription {
    id: u64,
    channel: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
    inner: Arc<Inner>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Delivery::Message(payload))) => Ok(Some(payload)),
            Ok(Some(Delivery::Fault(message))) => Err(BrokerError::Receive(message)),
            Ok(None) => Err(BrokerError::Closed),
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let _ = self.inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(&self.channel, self.id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(&self.channel, self.id);
        self.rx.close();
        Ok(())
    }
}

// Deregisters a subscription that was never closed, e.g. one owned by a
// task that was aborted. `remove` is a no-op after `unsubscribe`/`close`.
impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.inner.remove(&self.channel, self.id);
    }
}
