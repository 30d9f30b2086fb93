//! Message store
//!
//! Publish, persist and fetch relay messages on top of a [`Broker`].

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Broker, BrokerSubscription};
use crate::audience::{AudienceDescriptor, FetchAudience};
use crate::channel::{Audience, ChannelKey, ChannelNamer};
use crate::context::RequestContext;
use crate::error::Result;
use crate::message::{Heartbeat, Message};

/// Broker-backed store shared by every connection
#[derive(Clone)]
pub struct MessageStore {
    broker: Arc<dyn Broker>,
    namer: ChannelNamer,
    heartbeat: Heartbeat,
}

impl MessageStore {
    /// Create a store over `broker`.
    pub fn new(broker: Arc<dyn Broker>, namer: ChannelNamer, heartbeat: Heartbeat) -> Self {
        Self {
            broker,
            namer,
            heartbeat,
        }
    }

    /// Underlying broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Channel namer.
    #[must_use]
    pub fn namer(&self) -> &ChannelNamer {
        &self.namer
    }

    /// Heartbeat sentinel.
    #[must_use]
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Publish on every channel; with a non-zero `ttl` also persist the
    /// message under each channel key for late subscribers.
    ///
    /// Heartbeat payloads are dropped without touching the broker.
    ///
    /// # Errors
    ///
    /// The first broker failure; no retries.
    pub async fn publish<'a, I>(&self, channels: I, message: &Message, ttl: Duration) -> Result<()>
    where
        I: IntoIterator<Item = &'a ChannelKey>,
    {
        if self.heartbeat.matches(&message.payload) {
            debug!("Refusing to publish heartbeat as content");
            return Ok(());
        }
        for channel in channels {
            self.broker.publish(channel.as_str(), &message.payload).await?;
            if !ttl.is_zero() {
                self.broker
                    .set_with_expiry(channel.as_str(), &message.payload, ttl)
                    .await?;
            }
            debug!(channel = %channel, tag = ?message.tag, ttl = ttl.as_secs(), "Message published");
        }
        Ok(())
    }

    /// Resolve `descriptor` and publish a payload, as a server-side publisher.
    ///
    /// Returns the channels published on; empty when the payload is the
    /// heartbeat or empty.
    ///
    /// # Errors
    ///
    /// The first broker failure.
    pub async fn publish_to(
        &self,
        descriptor: &AudienceDescriptor,
        ctx: &RequestContext,
        facility: &str,
        payload: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<BTreeSet<ChannelKey>> {
        let Some(message) = Message::new(payload, &self.heartbeat) else {
            return Ok(BTreeSet::new());
        };
        let channels = self.namer.resolve(descriptor, ctx, facility);
        self.publish(&channels, &message, ttl).await?;
        info!(facility = %facility, channels = channels.len(), "Server-side message published");
        Ok(channels)
    }

    /// First persisted message for `facility`, looking at session, user,
    /// groups and broadcast in that order (or only the requested audience).
    ///
    /// # Errors
    ///
    /// Broker failure while reading.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        facility: &str,
        audience: FetchAudience,
    ) -> Result<Option<Bytes>> {
        for channel in self.fetch_candidates(ctx, facility, audience) {
            if let Some(value) = self.broker.get(channel.as_str()).await? {
                if !value.is_empty() && !self.heartbeat.matches(&value) {
                    debug!(channel = %channel, "Persisted message found");
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn fetch_candidates(
        &self,
        ctx: &RequestContext,
        facility: &str,
        audience: FetchAudience,
    ) -> Vec<ChannelKey> {
        let mut channels = Vec::new();
        for audience in audience.order() {
            match audience {
                Audience::Session => {
                    if let Some(session) = ctx.session_key.as_deref() {
                        channels.push(self.namer.key(audience, Some(session), facility));
                    }
                }
                Audience::User => {
                    if let Some(identity) = ctx.identity.as_deref() {
                        channels.push(self.namer.key(audience, Some(identity), facility));
                    }
                }
                Audience::Group => {
                    if ctx.is_authenticated() {
                        channels.extend(
                            ctx.group_list()
                                .iter()
                                .map(|g| self.namer.key(audience, Some(g.as_str()), facility)),
                        );
                    }
                }
                Audience::Broadcast => channels.push(self.namer.broadcast(facility)),
            }
        }
        channels
    }

    /// Open one subscription covering exactly `channels`.
    ///
    /// # Errors
    ///
    /// Broker failure while subscribing.
    pub async fn subscribe(&self, channels: &[ChannelKey]) -> Result<Box<dyn BrokerSubscription>> {
        self.broker.subscribe(channels).await
    }

    /// Persisted messages currently stored under `channels`, in order,
    /// skipping empty values and the heartbeat.
    ///
    /// # Errors
    ///
    /// Broker failure while reading.
    pub async fn persisted(&self, channels: &[ChannelKey]) -> Result<Vec<Bytes>> {
        let mut found = Vec::new();
        for channel in channels {
            if let Some(value) = self.broker.get(channel.as_str()).await? {
                if !value.is_empty() && !self.heartbeat.matches(&value) {
                    found.push(value);
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audience::Address;
    use crate::store::MemoryBroker;

    fn store(broker: &MemoryBroker) -> MessageStore {
        MessageStore::new(
            Arc::new(broker.clone()),
            ChannelNamer::new("ws"),
            Heartbeat::new("--heartbeat--"),
        )
    }

    fn message(payload: &'static str) -> Message {
        Message::new(payload, &Heartbeat::disabled()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_without_ttl_persists_nothing() {
        let broker = MemoryBroker::new();
        let store = store(&broker);
        let key = store.namer().broadcast("room1");
        let mut sub = store.subscribe(std::slice::from_ref(&key)).await.unwrap();

        store
            .publish([&key], &message("hello"), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(
            sub.poll().await.unwrap().unwrap().payload,
            Bytes::from_static(b"hello")
        );
        assert_eq!(broker.get(key.as_str()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_publish_with_ttl_is_fetchable() {
        let broker = MemoryBroker::new();
        let store = store(&broker);
        let key = store.namer().broadcast("room1");
        store
            .publish([&key], &message("kept"), Duration::from_secs(60))
            .await
            .unwrap();

        let fetched = store
            .fetch(&RequestContext::anonymous(), "room1", FetchAudience::Any)
            .await
            .unwrap();
        assert_eq!(fetched, Some(Bytes::from_static(b"kept")));
        assert_eq!(
            store.persisted(&[key]).await.unwrap(),
            vec![Bytes::from_static(b"kept")]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_is_never_published_or_fetched() {
        let broker = MemoryBroker::new();
        let store = store(&broker);
        let key = store.namer().broadcast("room1");
        let hb = Message {
            payload: Bytes::from_static(b"--heartbeat--"),
            tag: None,
        };
        store
            .publish([&key], &hb, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(broker.get(key.as_str()).await.unwrap(), None);

        broker
            .set_with_expiry(key.as_str(), b"--heartbeat--", Duration::from_secs(60))
            .await
            .unwrap();
        let fetched = store
            .fetch(&RequestContext::anonymous(), "room1", FetchAudience::Any)
            .await
            .unwrap();
        assert_eq!(fetched, None);
    }

    #[tokio::test]
    async fn test_fetch_priority_session_first() {
        let broker = MemoryBroker::new();
        let store = store(&broker);
        let ttl = Duration::from_secs(60);
        let ctx = RequestContext::anonymous()
            .with_identity("john")
            .with_session("s1")
            .with_groups(["staff"]);

        for (key, value) in [
            ("ws:broadcast:f", "to-all"),
            ("ws:group:staff:f", "to-staff"),
            ("ws:user:john:f", "to-john"),
        ] {
            broker
                .set_with_expiry(key, value.as_bytes(), ttl)
                .await
                .unwrap();
        }

        let any = store.fetch(&ctx, "f", FetchAudience::Any).await.unwrap();
        assert_eq!(any, Some(Bytes::from_static(b"to-john")));

        broker
            .set_with_expiry("ws:session:s1:f", b"to-session", ttl)
            .await
            .unwrap();
        let any = store.fetch(&ctx, "f", FetchAudience::Any).await.unwrap();
        assert_eq!(any, Some(Bytes::from_static(b"to-session")));

        let only = store
            .fetch(&ctx, "f", FetchAudience::Only(Audience::Broadcast))
            .await
            .unwrap();
        assert_eq!(only, Some(Bytes::from_static(b"to-all")));

        let groups = store
            .fetch(&ctx, "f", FetchAudience::Only(Audience::Group))
            .await
            .unwrap();
        assert_eq!(groups, Some(Bytes::from_static(b"to-staff")));
    }

    #[tokio::test]
    async fn test_publish_to_resolves_descriptor() {
        let broker = MemoryBroker::new();
        let store = store(&broker);
        let desc = AudienceDescriptor::new()
            .broadcast()
            .user(Address::literal("mary"));
        let channels = store
            .publish_to(
                &desc,
                &RequestContext::anonymous(),
                "news",
                "extra",
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        let names: Vec<&str> = channels.iter().map(ChannelKey::as_str).collect();
        assert_eq!(names, vec!["ws:broadcast:news", "ws:user:mary:news"]);
        assert_eq!(
            broker.get("ws:user:mary:news").await.unwrap(),
            Some(Bytes::from_static(b"extra"))
        );
    }
}
