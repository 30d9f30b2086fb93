//! Server configuration types
//!
//! Mirrors `config/default.toml`; every section has serde defaults so partial
//! overrides from files or the environment deserialize cleanly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use wsbridge_core::{ChannelNamer, Heartbeat};
use wsbridge_gateway::{ChannelDirective, DefaultPolicy, FacilityRegistry, GatewayConfig};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Settings for the connection gateway.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            websocket_url: self.server.websocket_url.clone(),
            select_timeout: Duration::from_secs(self.gateway.select_timeout_secs),
            handshake_timeout: Duration::from_secs(self.server.handshake_timeout_secs),
            max_message_len: self.gateway.max_message_bytes,
            persist_ttl: self.persist_ttl(),
        }
    }

    /// Expiry for persisted messages; zero disables persistence.
    pub fn persist_ttl(&self) -> Duration {
        Duration::from_secs(self.redis.expire_secs)
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat::from_config(self.gateway.heartbeat.as_deref())
    }

    pub fn namer(&self) -> ChannelNamer {
        ChannelNamer::new(self.redis.prefix.clone())
    }

    /// Build the ordered facility registry.
    pub fn facility_registry(&self) -> Result<FacilityRegistry> {
        let mut registry = FacilityRegistry::new();
        for facility in &self.gateway.facilities {
            let policy = match &facility.allow {
                Some(allow) => DefaultPolicy::allowing(
                    allow
                        .iter()
                        .map(|d| d.parse::<ChannelDirective>())
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(anyhow::Error::msg)
                        .with_context(|| format!("Invalid allow list for '{}'", facility.pattern))?,
                ),
                None => DefaultPolicy::permissive(),
            };
            registry = registry
                .register(&facility.pattern, Arc::new(policy))
                .with_context(|| format!("Invalid facility pattern '{}'", facility.pattern))?;
        }
        Ok(registry)
    }
}

/// WebSocket listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub websocket_url: String,
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            websocket_url: "/ws/".to_string(),
            handshake_timeout_secs: 10,
        }
    }
}

/// Which broker implementation backs the message store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    #[default]
    Redis,
    /// In-process broker for development and tests
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default)]
    pub prefix: String,
    pub expire_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            prefix: String::new(),
            expire_secs: 3600,
        }
    }
}

/// Relay loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub heartbeat: Option<String>,
    pub select_timeout_secs: u64,
    pub max_message_bytes: usize,
    pub session_cookie: String,
    #[serde(default = "default_facilities")]
    pub facilities: Vec<FacilityConfig>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat: None,
            select_timeout_secs: 4,
            max_message_bytes: 1_048_576,
            session_cookie: "sessionid".to_string(),
            facilities: default_facilities(),
        }
    }
}

fn default_facilities() -> Vec<FacilityConfig> {
    vec![FacilityConfig {
        pattern: ".*".to_string(),
        allow: None,
    }]
}

/// One facility registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityConfig {
    /// Regex matched against the start of the facility name
    pub pattern: String,
    /// Channel directives this facility may use; all when absent
    #[serde(default)]
    pub allow: Option<Vec<String>>,
}

/// Health endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gateway_config() {
        let config = AppConfig::default();
        let gateway = config.gateway_config();
        assert_eq!(gateway.websocket_url, "/ws/");
        assert_eq!(gateway.select_timeout, Duration::from_secs(4));
        assert_eq!(gateway.persist_ttl, Duration::from_secs(3600));
        assert_eq!(config.heartbeat(), Heartbeat::disabled());
    }

    #[test]
    fn test_facility_registry_from_config() {
        let mut config = AppConfig::default();
        config.gateway.facilities = vec![
            FacilityConfig {
                pattern: "chat".to_string(),
                allow: Some(vec!["subscribe-broadcast".to_string()]),
            },
            FacilityConfig {
                pattern: ".*".to_string(),
                allow: None,
            },
        ];
        let registry = config.facility_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("chatroom").is_ok());
    }

    #[test]
    fn test_unknown_directive_is_rejected() {
        let mut config = AppConfig::default();
        config.gateway.facilities = vec![FacilityConfig {
            pattern: "chat".to_string(),
            allow: Some(vec!["subscribe-everything".to_string()]),
        }];
        assert!(config.facility_registry().is_err());
    }
}
