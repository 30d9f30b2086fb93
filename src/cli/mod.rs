//! CLI module for wsbridge
//!
//! Provides commands:
//! - `serve`: run the WebSocket gateway
//! - `publish`: publish a message from the server side
//! - `fetch`: read a persisted message

use clap::{Parser, Subcommand};

use crate::server::config::AppConfig;

pub mod publish;

/// wsbridge CLI
#[derive(Parser, Debug)]
#[command(name = "wsbridge")]
#[command(about = "WebSocket to pub/sub broker relay")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway
    Serve,
    /// Publish a message to an audience
    Publish(publish::PublishArgs),
    /// Print the persisted message for a facility
    Fetch(publish::FetchArgs),
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run(config).await,
        Some(Commands::Publish(args)) => publish::publish(args, &config).await,
        Some(Commands::Fetch(args)) => publish::fetch(args, &config).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
