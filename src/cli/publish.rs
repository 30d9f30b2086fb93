//! Server-side publish and fetch

use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use wsbridge_core::{Address, AudienceDescriptor, FetchAudience, RequestContext};

use crate::server::build_store;
use crate::server::config::AppConfig;

/// Acting request context, used to resolve `SELF`
#[derive(Args, Debug, Default)]
pub struct ContextArgs {
    /// Identity of the acting user
    #[arg(long)]
    pub identity: Option<String>,
    /// Session key of the acting client
    #[arg(long = "session-key")]
    pub session_key: Option<String>,
    /// Group membership of the acting user (repeatable)
    #[arg(long = "member-of")]
    pub member_of: Vec<String>,
}

impl ContextArgs {
    fn context(&self) -> RequestContext {
        let mut ctx = RequestContext::anonymous();
        if let Some(identity) = &self.identity {
            ctx = ctx.with_identity(identity.clone());
        }
        if let Some(session) = &self.session_key {
            ctx = ctx.with_session(session.clone());
        }
        if !self.member_of.is_empty() {
            ctx = ctx.with_groups(self.member_of.iter().cloned());
        }
        ctx
    }
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Facility to publish on
    #[arg(long)]
    pub facility: String,
    /// Publish to everyone on the facility
    #[arg(long)]
    pub broadcast: bool,
    /// Target user, or SELF (repeatable)
    #[arg(long = "user")]
    pub users: Vec<String>,
    /// Target group, or SELF (repeatable)
    #[arg(long = "group")]
    pub groups: Vec<String>,
    /// Target session key, or SELF (repeatable)
    #[arg(long = "session")]
    pub sessions: Vec<String>,
    /// Audience descriptor as JSON instead of the flags above
    #[arg(long, conflicts_with_all = ["broadcast", "users", "groups", "sessions"])]
    pub audience: Option<String>,
    /// Expiry in seconds for the persisted copy (default: redis.expire_secs)
    #[arg(long)]
    pub expire: Option<u64>,
    #[command(flatten)]
    pub context: ContextArgs,
    /// Message payload
    pub message: String,
}

impl PublishArgs {
    fn descriptor(&self) -> Result<AudienceDescriptor> {
        if let Some(json) = &self.audience {
            return serde_json::from_str(json).context("Invalid audience JSON");
        }
        let mut descriptor = AudienceDescriptor::new();
        if self.broadcast {
            descriptor = descriptor.broadcast();
        }
        for user in &self.users {
            descriptor = descriptor.user(Address::parse(user.as_str()));
        }
        for group in &self.groups {
            descriptor = descriptor.group(Address::parse(group.as_str()));
        }
        for session in &self.sessions {
            descriptor = descriptor.session(Address::parse(session.as_str()));
        }
        Ok(descriptor)
    }
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Facility to read
    #[arg(long)]
    pub facility: String,
    /// `any`, `session`, `user`, `group` or `broadcast`
    #[arg(long, default_value = "any")]
    pub audience: String,
    #[command(flatten)]
    pub context: ContextArgs,
}

pub async fn publish(args: PublishArgs, config: &AppConfig) -> Result<()> {
    let descriptor = args.descriptor()?;
    if descriptor.is_empty() {
        anyhow::bail!("No audience given; use --broadcast, --user, --group, --session or --audience");
    }
    let ttl = args
        .expire
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.persist_ttl());

    let store = build_store(config).await?;
    let channels = store
        .publish_to(
            &descriptor,
            &args.context.context(),
            &args.facility,
            args.message.into_bytes(),
            ttl,
        )
        .await
        .context("Publish failed")?;

    if channels.is_empty() {
        println!("Nothing published");
    }
    for channel in &channels {
        println!("{}", channel);
    }
    Ok(())
}

pub async fn fetch(args: FetchArgs, config: &AppConfig) -> Result<()> {
    let audience: FetchAudience = args
        .audience
        .parse()
        .with_context(|| format!("Unknown audience '{}'", args.audience))?;

    let store = build_store(config).await?;
    match store
        .fetch(&args.context.context(), &args.facility, audience)
        .await
        .context("Fetch failed")?
    {
        Some(payload) => println!("{}", String::from_utf8_lossy(&payload)),
        None => println!("No persisted message"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        publish: PublishArgs,
    }

    #[test]
    fn test_descriptor_from_flags() {
        let cli = TestCli::parse_from([
            "wsbridge", "--facility", "room1", "--broadcast", "--user", "SELF", "--user", "mary",
            "hello",
        ]);
        let descriptor = cli.publish.descriptor().unwrap();
        assert!(descriptor.broadcast);
        assert_eq!(
            descriptor.users,
            vec![Address::SelfRef, Address::literal("mary")]
        );
        assert_eq!(cli.publish.message, "hello");
    }

    #[test]
    fn test_descriptor_from_legacy_json() {
        let cli = TestCli::parse_from([
            "wsbridge",
            "--facility",
            "room1",
            "--audience",
            r#"{"users": true, "groups": "staff"}"#,
            "hello",
        ]);
        let descriptor = cli.publish.descriptor().unwrap();
        assert_eq!(descriptor.users, vec![Address::SelfRef]);
        assert_eq!(descriptor.groups, vec![Address::literal("staff")]);
    }

    #[test]
    fn test_context_from_flags() {
        let args = ContextArgs {
            identity: Some("john".to_string()),
            session_key: None,
            member_of: vec!["staff".to_string()],
        };
        let ctx = args.context();
        assert!(ctx.is_authenticated());
        assert_eq!(ctx.group_list(), ["staff".to_string()]);
    }
}
