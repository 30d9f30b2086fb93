//! Start-up configuration validation

use super::config::{AppConfig, BrokerBackend};
use super::loader::environment;
use anyhow::{bail, Result};
use tracing::warn;

/// Reject configurations the gateway cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.gateway.select_timeout_secs == 0 {
        bail!("gateway.select_timeout_secs must be greater than zero");
    }
    if config.gateway.max_message_bytes == 0 {
        bail!("gateway.max_message_bytes must be greater than zero");
    }
    if matches!(config.gateway.heartbeat.as_deref(), Some("")) {
        bail!("gateway.heartbeat must not be empty when set");
    }
    if !config.server.websocket_url.starts_with('/') {
        bail!("server.websocket_url must start with '/'");
    }
    // Compiles every pattern and checks every allow entry
    config.facility_registry()?;

    if environment().eq_ignore_ascii_case("production") {
        validate_production(config)?;
    }
    Ok(())
}

fn validate_production(config: &AppConfig) -> Result<()> {
    if config.broker.backend == BrokerBackend::Memory {
        bail!("broker.backend = \"memory\" is not allowed in production");
    }

    if config.server.host == "0.0.0.0" {
        warn!(
            "SECURITY WARNING: Server is binding to all interfaces (0.0.0.0) in production. \
             Consider binding to 127.0.0.1 and using a reverse proxy."
        );
    }

    if config.redis.url.starts_with("redis://") && !config.redis.url.contains('@') {
        warn!(
            "SECURITY WARNING: Redis connection appears to have no authentication in production. \
             Consider enabling Redis AUTH."
        );
    }

    Ok(())
}
