//! Connection gateway
//!
//! One task per client runs [`Gateway::handle`]: validate the upgrade,
//! resolve and subscribe to channels, replay persisted messages, then relay
//! between the WebSocket and the broker subscription until either side ends.
//! Every exit path goes through a single termination point that releases the
//! subscription before the close frame is sent.

use bytes::BytesMut;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wsbridge_core::MessageStore;
use wsbridge_protocol::{
    assure_protocol_requirements, negotiate, CloseCode, HandshakeError, HandshakeResponse,
    Message, UpgradeRequest, WebSocket, WebSocketConfig,
};

use crate::acceptor::TransportAcceptor;
use crate::context::ContextProvider;
use crate::error::{Error, Result};
use crate::negotiate::ChannelRequest;
use crate::policy::FacilityRegistry;
use crate::registry::{ConnectionInfo, ConnectionRegistry};
use crate::subscriber::Subscriber;
use crate::upgrade::read_upgrade_request;

/// Reason sent with the close frame on a normal server-side close.
pub const CLOSE_REASON: &str = "Websocket Closed";

/// Per-connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Validating the upgrade request
    Handshaking,
    /// Upgrade accepted, subscription open
    Subscribed,
    /// Relaying between client and broker
    Relaying,
    /// Subscription released, close frame being sent
    Closing,
    /// Done
    Closed,
}

/// Gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Path prefix; the remainder of the path names the facility
    pub websocket_url: String,
    /// Bound on waiting for either side before flushing
    pub select_timeout: Duration,
    /// Bound on reading the upgrade request head
    pub handshake_timeout: Duration,
    /// Largest data message accepted from a client
    pub max_message_len: usize,
    /// Expiry for persisted client messages; zero disables persistence
    pub persist_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            websocket_url: "/ws/".to_string(),
            select_timeout: Duration::from_secs(4),
            handshake_timeout: Duration::from_secs(10),
            max_message_len: 1_048_576,
            persist_ttl: Duration::from_secs(3600),
        }
    }
}

/// Why the relaying loop ended
enum Exit {
    PeerClosed(CloseCode),
    Disconnected,
    Shutdown,
    Failed(Error),
}

impl Exit {
    fn close_frame(&self) -> (CloseCode, String) {
        match self {
            Exit::PeerClosed(code) => (*code, String::new()),
            Exit::Disconnected | Exit::Shutdown => (CloseCode::GOING_AWAY, CLOSE_REASON.to_string()),
            Exit::Failed(e) => (e.close_code(), e.to_string()),
        }
    }
}

/// Accepted upgrade, ready to switch protocols
struct Accepted {
    response: HandshakeResponse,
    facility: String,
    channels: ChannelRequest,
    subscriber: Subscriber,
}

/// The WebSocket to broker relay
pub struct Gateway {
    config: GatewayConfig,
    store: MessageStore,
    facilities: FacilityRegistry,
    context: Arc<dyn ContextProvider>,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Create a gateway.
    pub fn new(
        config: GatewayConfig,
        store: MessageStore,
        facilities: FacilityRegistry,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        Self {
            config,
            store,
            facilities,
            context,
            registry: ConnectionRegistry::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Live connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Message store shared by all connections.
    #[must_use]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Token that stops [`Gateway::serve`] and closes live connections.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept transports until shutdown, one task per connection.
    ///
    /// After shutdown no new connection is accepted; live connections are
    /// closed with 1001 and awaited.
    pub async fn serve<A>(self: Arc<Self>, mut acceptor: A)
    where
        A: TransportAcceptor,
    {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = acceptor.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = Arc::clone(&self);
                        tasks.spawn(async move { gateway.handle_transport(stream, peer).await });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        info!(live = self.registry.len(), "Gateway stopped accepting connections");
        while tasks.join_next().await.is_some() {}
    }

    /// Read the upgrade request off a fresh transport and handle it.
    ///
    /// Failures are logged; the transport is always dropped on return.
    pub async fn handle_transport<S>(&self, mut stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let head = tokio::time::timeout(
            self.config.handshake_timeout,
            read_upgrade_request(&mut stream),
        )
        .await;
        let (request, leftover) = match head {
            Ok(Ok(head)) => head,
            Ok(Err(Error::Io(e))) => {
                debug!(peer = ?peer, error = %e, "Connection dropped before upgrade");
                return;
            }
            Ok(Err(e)) => {
                reject(&mut stream, &e, peer).await;
                return;
            }
            Err(_) => {
                reject(&mut stream, &Error::Timeout, peer).await;
                return;
            }
        };

        if let Err(e) = self.handle(stream, request, leftover, peer).await {
            debug!(peer = ?peer, error = %e, "Connection ended with error");
        }
    }

    /// Run one connection from a parsed upgrade request to its close.
    ///
    /// Errors before the upgrade are answered with an HTTP error response;
    /// errors after it with a close frame. Either way they are also returned.
    ///
    /// # Errors
    ///
    /// The error that ended the connection, if it did not close normally.
    pub async fn handle<S>(
        &self,
        mut stream: S,
        request: UpgradeRequest,
        leftover: BytesMut,
        peer: Option<SocketAddr>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let conn_id = Uuid::new_v4();
        debug!(conn_id = %conn_id, state = ?ConnectionState::Handshaking, path = %request.path, "State");

        let accepted = match self.accept_upgrade(conn_id, &request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                reject(&mut stream, &e, peer).await;
                return Err(e);
            }
        };
        let Accepted {
            response,
            facility,
            channels,
            mut subscriber,
        } = accepted;

        if let Err(e) = stream.write_all(&response.to_bytes()).await {
            subscriber.release().await;
            return Err(e.into());
        }

        let _registration = self.registry.register(ConnectionInfo {
            id: conn_id,
            peer,
            facility: facility.clone(),
            connected_at: Utc::now(),
        });
        info!(
            conn_id = %conn_id,
            peer = ?peer,
            facility = %facility,
            channels = %channels,
            "WebSocket connection opened"
        );
        debug!(conn_id = %conn_id, state = ?ConnectionState::Subscribed, "State");

        let mut ws = WebSocket::from_parts(
            stream,
            leftover,
            WebSocketConfig {
                max_message_len: self.config.max_message_len,
            },
        );

        let exit = match subscriber.replay_persisted(&mut ws).await {
            Ok(_) => {
                debug!(conn_id = %conn_id, state = ?ConnectionState::Relaying, "State");
                self.relay(&mut ws, &mut subscriber).await
            }
            Err(e) => Exit::Failed(e),
        };

        debug!(conn_id = %conn_id, state = ?ConnectionState::Closing, "State");
        subscriber.release().await;
        let (code, reason) = exit.close_frame();
        if let Err(e) = ws.close(code, &reason).await {
            debug!(conn_id = %conn_id, error = %e, "Close frame not delivered");
        }
        debug!(conn_id = %conn_id, state = ?ConnectionState::Closed, "State");

        match exit {
            Exit::Failed(e) => {
                warn!(conn_id = %conn_id, code = %code, error = %e, "WebSocket connection failed");
                Err(e)
            }
            _ => {
                info!(conn_id = %conn_id, code = %code, "WebSocket connection closed");
                Ok(())
            }
        }
    }

    fn facility<'a>(&self, path: &'a str) -> Result<&'a str> {
        path.strip_prefix(self.config.websocket_url.as_str())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn accept_upgrade(&self, conn_id: Uuid, request: &UpgradeRequest) -> Result<Accepted> {
        assure_protocol_requirements(request)?;
        let facility = self.facility(&request.path)?;
        let policy = self.facilities.lookup(facility)?;

        let ctx = self.context.context(request);
        let requested = ChannelRequest::from_query(request.query.as_deref());
        let channels = policy.allowed_channels(&ctx, facility, requested)?;

        let response = negotiate(request)?;
        let subscriber = Subscriber::open(
            conn_id,
            self.store.clone(),
            &channels,
            &ctx,
            facility,
            self.config.persist_ttl,
        )
        .await?;

        Ok(Accepted {
            response,
            facility: facility.to_string(),
            channels,
            subscriber,
        })
    }

    async fn relay<S>(&self, ws: &mut WebSocket<S>, subscriber: &mut Subscriber) -> Exit
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let heartbeat = self.store.heartbeat().value().cloned();
        loop {
            let exit = tokio::select! {
                _ = self.shutdown.cancelled() => Some(Exit::Shutdown),
                incoming = ws.receive() => match incoming {
                    Ok(Some(Message::Close(frame))) => Some(Exit::PeerClosed(frame.code)),
                    Ok(Some(message)) => subscriber
                        .publish(message.into_payload())
                        .await
                        .err()
                        .map(Exit::Failed),
                    Ok(None) => Some(Exit::Disconnected),
                    Err(e) => Some(Exit::Failed(e.into())),
                },
                pushed = subscriber.poll() => match pushed {
                    Ok(Some(pushed)) => match subscriber.relayable(pushed) {
                        Some(payload) => ws.send_payload(payload).await.err().map(|e| Exit::Failed(e.into())),
                        None => None,
                    },
                    Ok(None) => Some(Exit::Failed(Error::Broker(wsbridge_core::Error::Broker(
                        "subscription ended".into(),
                    )))),
                    Err(e) => Some(Exit::Failed(e)),
                },
                _ = tokio::time::sleep(self.config.select_timeout) => {
                    ws.flush().await.err().map(|e| Exit::Failed(e.into()))
                }
            };
            if let Some(exit) = exit {
                return exit;
            }

            if let Some(heartbeat) = &heartbeat {
                if !ws.is_closed() {
                    if let Err(e) = ws.send_payload(heartbeat.clone()).await {
                        return Exit::Failed(e.into());
                    }
                }
            }
        }
    }
}

async fn reject<S>(stream: &mut S, error: &Error, peer: Option<SocketAddr>)
where
    S: AsyncWrite + Unpin,
{
    match error {
        Error::Handshake(HandshakeError::UpgradeRequired) => {
            info!(peer = ?peer, "Websocket upgrade required");
        }
        _ => warn!(peer = ?peer, status = %error.status(), error = %error, "Upgrade rejected"),
    }
    if stream.write_all(&error.response()).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}
