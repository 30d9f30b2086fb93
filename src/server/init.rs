//! Server initialization and run loop

use super::config::{AppConfig, BrokerBackend};
use super::health::{health_routes, HealthState};
use super::validation::validate_config;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wsbridge_core::{Broker, MemoryBroker, MessageStore, RedisBroker};
use wsbridge_gateway::{CookieSessionProvider, Gateway, TcpAcceptor};

/// How long live connections get to close after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Connect the configured broker and wrap it in a message store.
pub async fn build_store(config: &AppConfig) -> Result<MessageStore> {
    let broker: Arc<dyn Broker> = match config.broker.backend {
        BrokerBackend::Redis => Arc::new(
            RedisBroker::connect(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        BrokerBackend::Memory => {
            warn!("Using in-memory broker; messages are not shared between processes");
            Arc::new(MemoryBroker::new())
        }
    };
    info!(backend = broker.name(), "Broker ready");
    Ok(MessageStore::new(broker, config.namer(), config.heartbeat()))
}

/// Run the WebSocket gateway (and health endpoint) until a shutdown signal.
pub async fn run(config: AppConfig) -> Result<()> {
    validate_config(&config)?;
    info!("Starting wsbridge v{}", env!("CARGO_PKG_VERSION"));

    let store = build_store(&config).await?;
    let gateway = Arc::new(Gateway::new(
        config.gateway_config(),
        store.clone(),
        config.facility_registry()?,
        Arc::new(CookieSessionProvider::new(
            config.gateway.session_cookie.clone(),
        )),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let acceptor = TcpAcceptor::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind WebSocket listener on {}", addr))?;
    info!(
        "WebSocket gateway listening on ws://{}{}",
        acceptor.local_addr()?,
        config.server.websocket_url
    );

    let shutdown = gateway.shutdown_token();

    let health = if config.health.enabled {
        let addr = format!("{}:{}", config.server.host, config.health.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind health listener on {}", addr))?;
        info!("Health endpoint on http://{}/health", listener.local_addr()?);
        let app = health_routes(HealthState {
            registry: Arc::clone(gateway.registry()),
            store,
        });
        let stop = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                warn!(error = %e, "Health server error");
            }
        }))
    } else {
        None
    };

    let server = tokio::spawn(Arc::clone(&gateway).serve(acceptor));

    wait_for_shutdown_signal().await;
    info!(
        live = gateway.registry().len(),
        "Shutting down, closing live connections"
    );
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Gateway task failed"),
        Err(_) => warn!("Gateway shutdown timeout, aborting"),
    }
    if let Some(health) = health {
        if let Err(e) = health.await {
            warn!(error = %e, "Health server task failed");
        }
    }

    info!("wsbridge shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
