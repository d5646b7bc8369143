//! # relay-broker
//!
//! The pub/sub side of the stream relay.
//!
//! - [`Broker`] / [`Subscription`]: the seam the stream session consumes
//! - [`ChannelBinder`]: session id → channel name → owned subscription
//! - [`RedisBroker`]: production broker over Redis pub/sub
//! - [`MemoryBroker`]: in-process fan-out broker for tests and local runs

#![deny(unsafe_code)]

pub mod binder;
pub mod broker;
pub mod errors;
pub mod memory;
pub mod redis_broker;
pub mod session_id;

pub use binder::ChannelBinder;
pub use broker::{Broker, Subscription};
pub use errors::{BrokerError, Result};
pub use memory::{MemoryBroker, MemoryBrokerStats};
pub use redis_broker::RedisBroker;
pub use session_id::{CHANNEL_PREFIX, SessionId, SessionIdError, channel_name};
