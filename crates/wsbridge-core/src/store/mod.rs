//! Broker contract and message store
//!
//! [`Broker`] is the thin pub/sub + expiring key-value primitive the relay
//! needs from its backend. [`MessageStore`] layers channel resolution,
//! persistence and heartbeat filtering on top of it.

mod memory;
mod message_store;
mod redis;

pub use self::memory::{MemoryBroker, MemorySubscription};
pub use self::message_store::MessageStore;
pub use self::redis::{RedisBroker, RedisSubscription};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::channel::ChannelKey;
use crate::error::Result;

/// A message pushed by the broker to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Raw payload
    pub payload: Bytes,
}

/// Pub/sub broker with expiring keys
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Publish `payload` on `channel`; returns the number of receivers.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize>;

    /// Store `payload` under `channel` for `ttl`.
    async fn set_with_expiry(&self, channel: &str, payload: &[u8], ttl: Duration) -> Result<()>;

    /// Read the value stored under `channel`, if it has not expired.
    async fn get(&self, channel: &str) -> Result<Option<Bytes>>;

    /// Open one subscription covering exactly `channels`.
    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<Box<dyn BrokerSubscription>>;

    /// Round-trip check.
    async fn ping(&self) -> Result<()>;
}

/// A live broker subscription
///
/// Must be released with [`BrokerSubscription::unsubscribe`]; dropping it
/// also releases it, without reporting errors.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Channels covered by this subscription.
    fn channels(&self) -> &[ChannelKey];

    /// Wait for the next pushed message.
    ///
    /// Cancel safe: dropping the future loses no message. `Ok(None)` means
    /// the subscription ended and will never yield again.
    async fn poll(&mut self) -> Result<Option<PushedMessage>>;

    /// Unsubscribe from every channel. Calling it again is a no-op.
    async fn unsubscribe(&mut self) -> Result<()>;
}
