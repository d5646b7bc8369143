//! Channel binding: session id → channel → subscription, and its release.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::{Broker, Subscription};
use crate::errors::{BrokerError, Result};
use crate::session_id::SessionId;

/// Opens and releases per-stream subscriptions on the shared broker.
#[derive(Clone)]
pub struct ChannelBinder {
    broker: Arc<dyn Broker>,
}

impl ChannelBinder {
    /// Bind to a broker client.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// The shared broker client.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Subscribe to the session's channel.
    ///
    /// Every failure is reported as [`BrokerError::Unavailable`]; there are no
    /// retries.
    pub async fn open(&self, session_id: &SessionId) -> Result<Box<dyn Subscription>> {
        let channel = session_id.channel_name();
        match self.broker.subscribe(&channel).await {
            Ok(subscription) => {
                debug!(session_id = %session_id, channel, "subscribed");
                Ok(subscription)
            }
            Err(BrokerError::Unavailable(msg)) => Err(BrokerError::Unavailable(msg)),
            Err(e) => Err(BrokerError::Unavailable(e.to_string())),
        }
    }

    /// Unsubscribe and close. Best-effort: failures are logged, never raised.
    ///
    /// Takes the subscription by value so it cannot be released twice.
    pub async fn close(&self, mut subscription: Box<dyn Subscription>) {
        let channel = subscription.channel().to_string();
        if let Err(e) = subscription.unsubscribe().await {
            warn!(channel, error = %e, "unsubscribe failed during cleanup");
        }
        if let Err(e) = subscription.close().await {
            warn!(channel, error = %e, "subscription close failed during cleanup");
        }
        debug!(channel, "subscription released");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::memory::MemoryBroker;

    /// Subscription whose teardown always fails.
    struct BrokenSubscription {
        unsubscribes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Subscription for BrokenSubscription {
        fn channel(&self) -> &str {
            "chat_stream:broken"
        }

        async fn receive(&mut self, _timeout: Duration) -> Result<Option<String>> {
            Err(BrokerError::Closed)
        }

        async fn unsubscribe(&mut self) -> Result<()> {
            let _ = self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Command("connection reset".into()))
        }

        async fn close(&mut self) -> Result<()> {
            let _ = self.closes.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Command("connection reset".into()))
        }
    }

    /// Broker whose subscribe fails with a non-availability error.
    struct RejectingBroker;

    #[async_trait]
    impl Broker for RejectingBroker {
        async fn subscribe(&self, _channel: &str) -> Result<Box<dyn Subscription>> {
            Err(BrokerError::Command("NOPERM".into()))
        }

        async fn ping(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn session(raw: &str) -> SessionId {
        SessionId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn open_subscribes_to_derived_channel() {
        let broker = MemoryBroker::new();
        let binder = ChannelBinder::new(Arc::new(broker.clone()));

        let sub = binder.open(&session("s1")).await.unwrap();
        assert_eq!(sub.channel(), "chat_stream:s1");
        assert_eq!(broker.subscriber_count("chat_stream:s1"), 1);
    }

    #[tokio::test]
    async fn open_fails_when_broker_unreachable() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let binder = ChannelBinder::new(Arc::new(broker));

        let result = binder.open(&session("s1")).await;
        assert_matches!(result.err(), Some(BrokerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn open_maps_other_errors_to_unavailable() {
        let binder = ChannelBinder::new(Arc::new(RejectingBroker));
        let result = binder.open(&session("s1")).await;
        assert_matches!(result.err(), Some(BrokerError::Unavailable(msg)) if msg.contains("NOPERM"));
    }

    #[tokio::test]
    async fn close_releases_subscription() {
        let broker = MemoryBroker::new();
        let binder = ChannelBinder::new(Arc::new(broker.clone()));

        let sub = binder.open(&session("s1")).await.unwrap();
        binder.close(sub).await;

        assert_eq!(broker.subscriber_count("chat_stream:s1"), 0);
        let stats = broker.stats();
        assert_eq!(stats.unsubscribes, 1);
        assert_eq!(stats.closes, 1);
    }

    #[tokio::test]
    async fn close_swallows_teardown_errors() {
        let binder = ChannelBinder::new(Arc::new(MemoryBroker::new()));
        let unsubscribes = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let sub = BrokenSubscription {
            unsubscribes: unsubscribes.clone(),
            closes: closes.clone(),
        };

        binder.close(Box::new(sub)).await;

        // Close still ran after unsubscribe failed.
        assert_eq!(unsubscribes.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn independent_subscriptions_per_open() {
        let broker = MemoryBroker::new();
        let binder = ChannelBinder::new(Arc::new(broker.clone()));

        let a = binder.open(&session("shared")).await.unwrap();
        let b = binder.open(&session("shared")).await.unwrap();
        assert_eq!(broker.subscriber_count("chat_stream:shared"), 2);

        binder.close(a).await;
        assert_eq!(broker.subscriber_count("chat_stream:shared"), 1);
        binder.close(b).await;
        assert_eq!(broker.subscriber_count("chat_stream:shared"), 0);
    }
}
