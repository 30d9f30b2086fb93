//! In-process broker for development and tests

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::{Broker, BrokerSubscription, PushedMessage};
use crate::channel::ChannelKey;
use crate::error::Result;

type Listener = (u64, mpsc::UnboundedSender<PushedMessage>);

#[derive(Default)]
struct Inner {
    /// channel -> listening subscriptions
    listeners: DashMap<String, Vec<Listener>>,
    /// channel -> (value, expiry)
    values: DashMap<String, (Bytes, Instant)>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove_listener(&self, id: u64, channels: &[ChannelKey]) {
        for channel in channels {
            let now_empty = match self.listeners.get_mut(channel.as_str()) {
                Some(mut entry) => {
                    entry.retain(|(listener, _)| *listener != id);
                    entry.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.listeners
                    .remove_if(channel.as_str(), |_, listeners| listeners.is_empty());
            }
        }
    }
}

/// Broker kept entirely in process memory
///
/// Cloning yields a handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions listening on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .listeners
            .get(channel)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Total number of channels with at least one listener.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.inner.listeners.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        let message = PushedMessage {
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload),
        };
        let delivered = match self.inner.listeners.get(channel) {
            Some(listeners) => listeners
                .iter()
                .filter(|(_, tx)| tx.send(message.clone()).is_ok())
                .count(),
            None => 0,
        };
        debug!(channel = %channel, delivered, "memory publish");
        Ok(delivered)
    }

    async fn set_with_expiry(&self, channel: &str, payload: &[u8], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        // Prune expired entries; unread keys are never removed by `get`
        self.inner
            .values
            .retain(|_, (_, expires_at)| *expires_at > now);
        self.inner.values.insert(
            channel.to_string(),
            (Bytes::copy_from_slice(payload), now + ttl),
        );
        Ok(())
    }

    async fn get(&self, channel: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        if let Some(entry) = self.inner.values.get(channel) {
            let (value, expires_at) = entry.value();
            if *expires_at > now {
                return Ok(Some(value.clone()));
            }
        }
        self.inner
            .values
            .remove_if(channel, |_, (_, expires_at)| *expires_at <= now);
        Ok(None)
    }

    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<Box<dyn BrokerSubscription>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        for channel in channels {
            self.inner
                .listeners
                .entry(channel.as_str().to_string())
                .or_default()
                .push((id, tx.clone()));
        }
        Ok(Box::new(MemorySubscription {
            id,
            channels: channels.to_vec(),
            rx,
            inner: Arc::clone(&self.inner),
            released: false,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Subscription on a [`MemoryBroker`]
pub struct MemorySubscription {
    id: u64,
    channels: Vec<ChannelKey>,
    rx: mpsc::UnboundedReceiver<PushedMessage>,
    inner: Arc<Inner>,
    released: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.remove_listener(self.id, &self.channels);
            self.rx.close();
        }
    }
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    fn channels(&self) -> &[ChannelKey] {
        &self.channels
    }

    async fn poll(&mut self) -> Result<Option<PushedMessage>> {
        if self.channels.is_empty() || self.released {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelNamer;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broker = MemoryBroker::new();
        let key = ChannelNamer::default().broadcast("room1");
        let mut sub = broker.subscribe(std::slice::from_ref(&key)).await.unwrap();

        assert_eq!(broker.publish(key.as_str(), b"hello").await.unwrap(), 1);
        assert_eq!(broker.publish("broadcast:other", b"nope").await.unwrap(), 0);

        let msg = sub.poll().await.unwrap().unwrap();
        assert_eq!(msg.channel, "broadcast:room1");
        assert_eq!(msg.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_listener() {
        let broker = MemoryBroker::new();
        let key = ChannelNamer::default().broadcast("room1");
        let mut sub = broker.subscribe(std::slice::from_ref(&key)).await.unwrap();
        assert_eq!(broker.subscriber_count(key.as_str()), 1);

        sub.unsubscribe().await.unwrap();
        sub.unsubscribe().await.unwrap();
        assert_eq!(broker.subscriber_count(key.as_str()), 0);
        assert_eq!(broker.active_channels(), 0);
        assert_eq!(sub.poll().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_releases_listener() {
        let broker = MemoryBroker::new();
        let key = ChannelNamer::default().broadcast("room1");
        let sub = broker.subscribe(std::slice::from_ref(&key)).await.unwrap();
        drop(sub);
        assert_eq!(broker.subscriber_count(key.as_str()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() {
        let broker = MemoryBroker::new();
        broker
            .set_with_expiry("k", b"v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(broker.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(broker.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_values_are_pruned_on_write() {
        let broker = MemoryBroker::new();
        broker
            .set_with_expiry("stale-1", b"a", Duration::from_secs(5))
            .await
            .unwrap();
        broker
            .set_with_expiry("stale-2", b"b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(broker.inner.values.len(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        broker
            .set_with_expiry("fresh", b"c", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(broker.inner.values.len(), 1);
        assert!(broker.inner.values.contains_key("fresh"));
    }
}
