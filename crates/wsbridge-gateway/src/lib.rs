//! wsbridge Gateway - one relay loop per WebSocket connection
//!
//! This crate wires the protocol and core crates together:
//! - Upgrade: reading the upgrade request head off a raw stream
//! - Negotiate: the query-string channel vocabulary
//! - Policy: facility registry and channel allow-lists
//! - Context: obtaining the request context for an upgrade
//! - Subscriber: one broker subscription plus publish targets per connection
//! - Registry: live connection bookkeeping
//! - Acceptor: pluggable transport acceptor
//! - Connection: the gateway itself and its relaying loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acceptor;
pub mod connection;
pub mod context;
pub mod error;
pub mod negotiate;
pub mod policy;
pub mod registry;
pub mod subscriber;
pub mod upgrade;

pub use acceptor::{TcpAcceptor, TransportAcceptor};
pub use connection::{ConnectionState, Gateway, GatewayConfig};
pub use context::{ContextProvider, CookieSessionProvider};
pub use error::{Error, Result};
pub use negotiate::{ChannelDirective, ChannelRequest};
pub use policy::{ChannelPolicy, DefaultPolicy, FacilityRegistry};
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistrationGuard};
pub use subscriber::Subscriber;
pub use upgrade::{read_upgrade_request, MAX_HEAD_BYTES};
