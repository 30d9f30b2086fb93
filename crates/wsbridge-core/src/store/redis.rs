//! Redis-backed broker (for production)
//!
//! Commands share one multiplexed connection; every subscription opens its
//! own dedicated pub/sub connection, which is closed when the subscription is
//! released.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Broker, BrokerSubscription, PushedMessage};
use crate::channel::ChannelKey;
use crate::error::{Error, Result};

/// Broker backed by Redis `PUBLISH`/`SUBSCRIBE` and `SETEX`/`GET`
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisBroker {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the server is unreachable
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Broker(format!("Invalid Redis URL: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Broker(format!("Redis connection failed: {}", e)))?;
        debug!("Redis broker connected");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Broker(format!("Redis PUBLISH failed: {}", e)))?;
        debug!(channel = %channel, receivers, "Published to Redis");
        Ok(receivers)
    }

    async fn set_with_expiry(&self, channel: &str, payload: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SETEX")
            .arg(channel)
            .arg(ttl.as_secs().max(1))
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Broker(format!("Redis SETEX failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, channel: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(channel)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Broker(format!("Redis GET failed: {}", e)))?;
        Ok(value.map(Bytes::from))
    }

    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<Box<dyn BrokerSubscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Broker(format!("Redis pub/sub connection failed: {}", e)))?;
        if !channels.is_empty() {
            let names: Vec<&str> = channels.iter().map(ChannelKey::as_str).collect();
            pubsub
                .subscribe(names)
                .await
                .map_err(|e| Error::Broker(format!("Redis SUBSCRIBE failed: {}", e)))?;
        }
        Ok(Box::new(RedisSubscription {
            pubsub: Some(pubsub),
            channels: channels.to_vec(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| Error::Broker(format!("Redis PING failed: {}", e)))?;
        Ok(())
    }
}

/// Subscription on a dedicated Redis pub/sub connection
pub struct RedisSubscription {
    /// `None` once released
    pubsub: Option<PubSub>,
    channels: Vec<ChannelKey>,
}

#[async_trait]
impl BrokerSubscription for RedisSubscription {
    fn channels(&self) -> &[ChannelKey] {
        &self.channels
    }

    async fn poll(&mut self) -> Result<Option<PushedMessage>> {
        let Some(pubsub) = self.pubsub.as_mut() else {
            return Ok(None);
        };
        let Some(msg) = pubsub.on_message().next().await else {
            warn!("Redis pub/sub stream ended");
            return Ok(None);
        };
        Ok(Some(PushedMessage {
            channel: msg.get_channel_name().to_string(),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        }))
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let Some(mut pubsub) = self.pubsub.take() else {
            return Ok(());
        };
        if !self.channels.is_empty() {
            let names: Vec<&str> = self.channels.iter().map(ChannelKey::as_str).collect();
            pubsub
                .unsubscribe(names)
                .await
                .map_err(|e| Error::Broker(format!("Redis UNSUBSCRIBE failed: {}", e)))?;
        }
        // Dropping the PubSub closes its connection
        Ok(())
    }
}

#[cfg(test)]
// Redis tests require a running Redis instance
// Run with: cargo test --features redis-tests
#[cfg(feature = "redis-tests")]
mod tests {
    use super::*;
    use crate::channel::ChannelNamer;

    #[tokio::test]
    async fn test_redis_publish_subscribe_persist() {
        let broker = RedisBroker::connect("redis://127.0.0.1:6379").await.unwrap();
        broker.ping().await.unwrap();

        let key = ChannelNamer::new("wsbridge-test").broadcast("room1");
        let mut sub = broker.subscribe(std::slice::from_ref(&key)).await.unwrap();

        broker.publish(key.as_str(), b"hello").await.unwrap();
        let msg = sub.poll().await.unwrap().unwrap();
        assert_eq!(msg.payload, Bytes::from_static(b"hello"));

        broker
            .set_with_expiry(key.as_str(), b"persisted", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            broker.get(key.as_str()).await.unwrap(),
            Some(Bytes::from_static(b"persisted"))
        );

        sub.unsubscribe().await.unwrap();
        sub.unsubscribe().await.unwrap();
    }
}
