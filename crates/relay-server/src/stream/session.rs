//! One client connection's stream: subscribe, relay, keep alive, release.

use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use relay_broker::{BrokerError, ChannelBinder, SessionId, Subscription};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    BROKER_ERRORS_TOTAL, EVENTS_SENT_TOTAL, STREAM_DURATION_SECONDS, STREAMS_ACTIVE,
    STREAMS_CLOSED_TOTAL, STREAMS_OPENED_TOTAL,
};
use crate::stream::event::{OutboundEvent, STOP_SENTINEL};

/// Timing knobs for a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Longest a single receive waits before the loop comes round again.
    pub poll_timeout: Duration,
    /// Minimum quiet time before a keep-alive is sent.
    pub ping_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Why a stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The stop sentinel arrived on the channel.
    Stopped,
    /// The client went away.
    Disconnected,
    /// The server cancelled the stream (shutdown).
    Cancelled,
    /// The broker failed mid-stream. One `error` event was sent.
    Failed(BrokerError),
}

impl StreamEnd {
    /// Metric/log label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// A subscribed stream that has not started producing events yet.
///
/// Created by [`StreamSession::open`], consumed by [`StreamSession::run`],
/// which releases the subscription before returning.
pub struct StreamSession {
    binder: ChannelBinder,
    session_id: SessionId,
    subscription: Box<dyn Subscription>,
    config: StreamConfig,
}

impl StreamSession {
    /// Subscribe to the session's channel.
    ///
    /// Fails with [`BrokerError::Unavailable`]; the stream never starts.
    pub async fn open(
        binder: ChannelBinder,
        session_id: SessionId,
        config: StreamConfig,
    ) -> Result<Self, BrokerError> {
        let subscription = binder.open(&session_id).await?;
        Ok(Self {
            binder,
            session_id,
            subscription,
            config,
        })
    }

    /// Channel the subscription listens on.
    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// Produce events into `tx` until the stream ends, then release the
    /// subscription.
    ///
    /// A dropped receiver reads as a client disconnect. Cancelling `cancel`
    /// ends the stream silently.
    pub async fn run(
        self,
        tx: mpsc::Sender<OutboundEvent>,
        cancel: CancellationToken,
    ) -> StreamEnd {
        let Self {
            binder,
            session_id,
            mut subscription,
            config,
        } = self;

        counter!(STREAMS_OPENED_TOTAL).increment(1);
        gauge!(STREAMS_ACTIVE).increment(1.0);
        let started = Instant::now();

        let outbox = Outbox {
            tx: &tx,
            cancel: &cancel,
        };
        let end = relay(&session_id, subscription.as_mut(), config, outbox).await;

        binder.close(subscription).await;

        let elapsed = started.elapsed();
        gauge!(STREAMS_ACTIVE).decrement(1.0);
        counter!(STREAMS_CLOSED_TOTAL, "reason" => end.reason()).increment(1);
        histogram!(STREAM_DURATION_SECONDS).record(elapsed.as_secs_f64());
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if end == StreamEnd::Disconnected {
            info!(duration_ms, "client disconnected");
        } else {
            info!(reason = end.reason(), duration_ms, "stream closed");
        }
        end
    }
}

/// Where events go, and the signal that stops sending them.
#[derive(Clone, Copy)]
struct Outbox<'a> {
    tx: &'a mpsc::Sender<OutboundEvent>,
    cancel: &'a CancellationToken,
}

impl Outbox<'_> {
    /// Deliver one event, waiting for buffer space if the client is slow.
    async fn send(self, event: OutboundEvent) -> Result<(), StreamEnd> {
        let kind = event.kind();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StreamEnd::Cancelled),
            sent = self.tx.send(event) => match sent {
                Ok(()) => {
                    counter!(EVENTS_SENT_TOTAL, "event" => kind).increment(1);
                    Ok(())
                }
                Err(_) => Err(StreamEnd::Disconnected),
            },
        }
    }
}

async fn relay(
    session_id: &SessionId,
    subscription: &mut dyn Subscription,
    config: StreamConfig,
    outbox: Outbox<'_>,
) -> StreamEnd {
    let connected = OutboundEvent::connected(session_id, subscription.channel());
    if let Err(end) = outbox.send(connected).await {
        return end;
    }
    let mut last_ping = Instant::now();

    loop {
        let received = tokio::select! {
            biased;
            () = outbox.cancel.cancelled() => return StreamEnd::Cancelled,
            () = outbox.tx.closed() => return StreamEnd::Disconnected,
            received = subscription.receive(config.poll_timeout) => received,
        };

        if last_ping.elapsed() > config.ping_interval {
            debug!("sending keep-alive");
            if let Err(end) = outbox.send(OutboundEvent::ping(Utc::now())).await {
                return end;
            }
            last_ping = Instant::now();
        }

        match received {
            Ok(None) => {}
            Ok(Some(payload)) if payload == STOP_SENTINEL => return StreamEnd::Stopped,
            Ok(Some(payload)) => {
                if let Err(end) = outbox.send(OutboundEvent::from_payload(payload)).await {
                    return end;
                }
            }
            Err(err) => {
                warn!(error = %err, kind = err.error_kind(), "broker error mid-stream");
                counter!(BROKER_ERRORS_TOTAL).increment(1);
                // The stream is over either way; a gone client just misses the notice.
                let _ = outbox.send(OutboundEvent::error(&err.to_string())).await;
                return StreamEnd::Failed(err);
            }
        }
    }
}
