//! Server module for wsbridge
//!
//! Contains the host process wiring around the gateway.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Start-up configuration validation
//! - `health`: `/health` endpoint
//! - `init`: Broker set-up, server start-up and shutdown

pub mod config;
mod health;
mod init;
mod loader;
mod validation;

// Re-export public API
pub use init::{build_store, run};
pub use loader::load_config;
