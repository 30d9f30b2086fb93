//! Per-connection subscriber
//!
//! Owns the one broker subscription of a connection together with the
//! channels the connection publishes on, and decides which pushed messages
//! are relayed back to the client.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use uuid::Uuid;

use wsbridge_core::{
    BrokerSubscription, ChannelKey, EchoTag, Message, MessageStore, PushedMessage, RequestContext,
};
use wsbridge_protocol::WebSocket;

use crate::error::Result;
use crate::negotiate::ChannelRequest;

/// Broker-side state of one connection
pub struct Subscriber {
    conn_id: Uuid,
    store: MessageStore,
    subscription: Option<Box<dyn BrokerSubscription>>,
    subscribe_channels: Vec<ChannelKey>,
    publish_channels: BTreeSet<ChannelKey>,
    echo: bool,
    ttl: Duration,
    sequence: u64,
    /// Payload of the last message this connection published
    last_sent: Option<Bytes>,
}

impl Subscriber {
    /// Resolve the requested channels and open the broker subscription.
    ///
    /// No subscription is opened when nothing resolves to a subscribe channel.
    ///
    /// # Errors
    ///
    /// Broker failure while subscribing.
    pub async fn open(
        conn_id: Uuid,
        store: MessageStore,
        request: &ChannelRequest,
        ctx: &RequestContext,
        facility: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let namer = store.namer();
        let subscribe_channels: Vec<ChannelKey> = namer
            .resolve(&request.subscribe_descriptor(), ctx, facility)
            .into_iter()
            .collect();
        let publish_channels = namer.resolve(&request.publish_descriptor(), ctx, facility);

        let subscription = if subscribe_channels.is_empty() {
            None
        } else {
            Some(store.subscribe(&subscribe_channels).await?)
        };
        debug!(
            conn_id = %conn_id,
            subscribe = ?subscribe_channels,
            publish = ?publish_channels,
            "Subscribed to channels"
        );

        Ok(Self {
            conn_id,
            store,
            subscription,
            subscribe_channels,
            publish_channels,
            echo: request.echo,
            ttl,
            sequence: 0,
            last_sent: None,
        })
    }

    /// Channels the subscription covers.
    #[must_use]
    pub fn subscribe_channels(&self) -> &[ChannelKey] {
        &self.subscribe_channels
    }

    /// Channels incoming client messages are published on.
    #[must_use]
    pub fn publish_channels(&self) -> &BTreeSet<ChannelKey> {
        &self.publish_channels
    }

    /// Whether a broker subscription is held.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Send every message persisted on the subscribed channels to `ws`.
    ///
    /// Returns the number of messages replayed.
    ///
    /// # Errors
    ///
    /// Broker read failure or transport failure.
    pub async fn replay_persisted<S>(&mut self, ws: &mut WebSocket<S>) -> Result<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let persisted = self.store.persisted(&self.subscribe_channels).await?;
        let count = persisted.len();
        for payload in persisted {
            ws.send_payload(payload).await?;
        }
        if count > 0 {
            debug!(conn_id = %self.conn_id, count, "Replayed persisted messages");
        }
        Ok(count)
    }

    /// Publish a client payload on every publish channel.
    ///
    /// Heartbeats and empty payloads are ignored and return `None`.
    ///
    /// # Errors
    ///
    /// Broker failure.
    pub async fn publish(&mut self, payload: Bytes) -> Result<Option<EchoTag>> {
        let Some(message) = Message::new(payload, self.store.heartbeat()) else {
            return Ok(None);
        };
        self.sequence += 1;
        let tag = EchoTag {
            origin: self.conn_id,
            sequence: self.sequence,
        };
        let message = message.tagged(tag);
        self.last_sent = Some(message.payload.clone());
        self.store
            .publish(&self.publish_channels, &message, self.ttl)
            .await?;
        Ok(Some(tag))
    }

    /// Wait for the next message pushed to the subscription.
    ///
    /// Never resolves when no subscription is held. Cancel safe.
    ///
    /// # Errors
    ///
    /// Broker failure.
    pub async fn poll(&mut self) -> Result<Option<PushedMessage>> {
        match self.subscription.as_mut() {
            Some(subscription) => Ok(subscription.poll().await?),
            None => std::future::pending().await,
        }
    }

    /// Payload to relay for a pushed message, if any.
    ///
    /// Drops heartbeats, and unless echo was requested, the message this
    /// connection just published.
    #[must_use]
    pub fn relayable(&self, pushed: PushedMessage) -> Option<Bytes> {
        let message = Message::new(pushed.payload, self.store.heartbeat())?;
        if !self.echo && self.last_sent.as_ref() == Some(&message.payload) {
            debug!(conn_id = %self.conn_id, channel = %pushed.channel, "Suppressed echo");
            return None;
        }
        Some(message.payload)
    }

    /// Unsubscribe and drop the broker subscription. Idempotent.
    pub async fn release(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe().await {
                warn!(conn_id = %self.conn_id, error = %e, "Failed to unsubscribe");
            }
            debug!(conn_id = %self.conn_id, "Subscription released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::ChannelDirective;
    use std::sync::Arc;
    use wsbridge_core::{Broker, ChannelNamer, Heartbeat, MemoryBroker};

    fn store(broker: &MemoryBroker) -> MessageStore {
        MessageStore::new(
            Arc::new(broker.clone()),
            ChannelNamer::default(),
            Heartbeat::new("--heartbeat--"),
        )
    }

    fn broadcast_both() -> ChannelRequest {
        ChannelRequest::default()
            .with(ChannelDirective::SubscribeBroadcast)
            .with(ChannelDirective::PublishBroadcast)
    }

    #[tokio::test]
    async fn test_open_resolves_channels() {
        let broker = MemoryBroker::new();
        let request = broadcast_both()
            .with(ChannelDirective::SubscribeUser)
            .with(ChannelDirective::PublishSession);
        let ctx = RequestContext::anonymous()
            .with_identity("john")
            .with_session("s1");
        let sub = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &request,
            &ctx,
            "room1",
            Duration::ZERO,
        )
        .await
        .unwrap();

        let subscribed: Vec<&str> = sub.subscribe_channels().iter().map(|c| c.as_str()).collect();
        assert_eq!(subscribed, vec!["broadcast:room1", "user:john:room1"]);
        let publishing: Vec<&str> = sub.publish_channels().iter().map(|c| c.as_str()).collect();
        assert_eq!(publishing, vec!["broadcast:room1", "session:s1:room1"]);
        assert_eq!(broker.subscriber_count("broadcast:room1"), 1);
    }

    #[tokio::test]
    async fn test_echo_is_suppressed_unless_requested() {
        let broker = MemoryBroker::new();
        let ctx = RequestContext::anonymous();
        let mut sub = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &broadcast_both(),
            &ctx,
            "room1",
            Duration::ZERO,
        )
        .await
        .unwrap();

        let tag = sub.publish(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(tag.map(|t| t.sequence), Some(1));
        let pushed = sub.poll().await.unwrap().unwrap();
        assert_eq!(sub.relayable(pushed), None);

        broker.publish("broadcast:room1", b"from-other").await.unwrap();
        let pushed = sub.poll().await.unwrap().unwrap();
        assert_eq!(sub.relayable(pushed), Some(Bytes::from_static(b"from-other")));

        let mut echoing = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &ChannelRequest {
                echo: true,
                ..broadcast_both()
            },
            &ctx,
            "room1",
            Duration::ZERO,
        )
        .await
        .unwrap();
        echoing.publish(Bytes::from_static(b"mine")).await.unwrap();
        let pushed = echoing.poll().await.unwrap().unwrap();
        assert_eq!(echoing.relayable(pushed), Some(Bytes::from_static(b"mine")));
    }

    #[tokio::test]
    async fn test_heartbeat_is_not_published_or_relayed() {
        let broker = MemoryBroker::new();
        let mut sub = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &broadcast_both(),
            &RequestContext::anonymous(),
            "room1",
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(
            sub.publish(Bytes::from_static(b"--heartbeat--")).await.unwrap(),
            None
        );
        assert_eq!(broker.get("broadcast:room1").await.unwrap(), None);

        let pushed = PushedMessage {
            channel: "broadcast:room1".into(),
            payload: Bytes::from_static(b"--heartbeat--"),
        };
        assert_eq!(sub.relayable(pushed), None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let broker = MemoryBroker::new();
        let mut sub = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &broadcast_both(),
            &RequestContext::anonymous(),
            "room1",
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert!(sub.is_subscribed());

        sub.release().await;
        sub.release().await;
        assert!(!sub.is_subscribed());
        assert_eq!(broker.subscriber_count("broadcast:room1"), 0);
    }

    #[tokio::test]
    async fn test_no_subscribe_channels_never_polls() {
        let broker = MemoryBroker::new();
        let request = ChannelRequest::default().with(ChannelDirective::PublishBroadcast);
        let mut sub = Subscriber::open(
            Uuid::new_v4(),
            store(&broker),
            &request,
            &RequestContext::anonymous(),
            "room1",
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert!(!sub.is_subscribed());

        let polled = tokio::time::timeout(Duration::from_millis(20), sub.poll()).await;
        assert!(polled.is_err());
    }
}
