//! wsbridge Core - channel addressing and message store
//!
//! This crate contains the broker-facing half of wsbridge:
//! - Channel: deterministic channel keys per audience and facility
//! - Audience: descriptors naming whom to publish to or subscribe as
//! - Context: the per-request identity used to resolve `SELF`
//! - Resolver: descriptor + context + facility to a set of channel keys
//! - Store: the broker contract, Redis and in-memory brokers, and the
//!   publish/fetch/subscribe message store built on top of them

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audience;
pub mod channel;
pub mod context;
pub mod error;
pub mod message;
pub mod resolver;
pub mod store;

pub use audience::{Address, AudienceDescriptor, FetchAudience};
pub use channel::{Audience, ChannelKey, ChannelNamer};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use message::{EchoTag, Heartbeat, Message};
pub use resolver::resolve;
pub use store::{
    Broker, BrokerSubscription, MemoryBroker, MessageStore, PushedMessage, RedisBroker,
};
