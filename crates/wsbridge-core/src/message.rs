//! Relay messages and the heartbeat sentinel

use bytes::Bytes;
use uuid::Uuid;

/// Configured heartbeat sentinel; `None` disables heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heartbeat(Option<Bytes>);

impl Heartbeat {
    /// Heartbeat with the given sentinel value.
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self(Some(value.into()))
    }

    /// No heartbeat configured.
    #[must_use]
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Build from an optional configuration value; empty strings disable it.
    #[must_use]
    pub fn from_config(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Self::new(Bytes::copy_from_slice(v.as_bytes())),
            _ => Self::disabled(),
        }
    }

    /// The sentinel value, if configured.
    #[must_use]
    pub fn value(&self) -> Option<&Bytes> {
        self.0.as_ref()
    }

    /// Whether `payload` is the sentinel.
    #[must_use]
    pub fn matches(&self, payload: &[u8]) -> bool {
        self.0.as_deref() == Some(payload)
    }
}

/// Identifies the connection and sequence number a message originated from.
///
/// Only kept locally for echo detection and logging; never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EchoTag {
    /// Originating connection
    pub origin: Uuid,
    /// Per-connection sequence number
    pub sequence: u64,
}

/// An opaque payload travelling through the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Payload bytes
    pub payload: Bytes,
    /// Origin tag for messages published by a connection
    pub tag: Option<EchoTag>,
}

impl Message {
    /// Wrap a payload; returns `None` for empty payloads and the heartbeat,
    /// which never count as user content.
    pub fn new(payload: impl Into<Bytes>, heartbeat: &Heartbeat) -> Option<Self> {
        let payload = payload.into();
        if payload.is_empty() || heartbeat.matches(&payload) {
            return None;
        }
        Some(Self { payload, tag: None })
    }

    /// Attach an origin tag.
    #[must_use]
    pub fn tagged(mut self, tag: EchoTag) -> Self {
        self.tag = Some(tag);
        self
    }
}
