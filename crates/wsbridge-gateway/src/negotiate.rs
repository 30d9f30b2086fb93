//! Query-string channel negotiation
//!
//! Clients name the channels they want as bare query parameters, e.g.
//! `/ws/chat?subscribe-broadcast&publish-user&echo`. Unknown parameters are
//! ignored; names are matched after trimming and lowercasing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use wsbridge_core::{Address, Audience, AudienceDescriptor};

/// One entry of the fixed channel vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelDirective {
    /// `subscribe-broadcast`
    SubscribeBroadcast,
    /// `subscribe-user`
    SubscribeUser,
    /// `subscribe-group`
    SubscribeGroup,
    /// `subscribe-session`
    SubscribeSession,
    /// `publish-broadcast`
    PublishBroadcast,
    /// `publish-user`
    PublishUser,
    /// `publish-group`
    PublishGroup,
    /// `publish-session`
    PublishSession,
}

impl ChannelDirective {
    /// The whole vocabulary.
    pub const ALL: [ChannelDirective; 8] = [
        ChannelDirective::SubscribeBroadcast,
        ChannelDirective::SubscribeUser,
        ChannelDirective::SubscribeGroup,
        ChannelDirective::SubscribeSession,
        ChannelDirective::PublishBroadcast,
        ChannelDirective::PublishUser,
        ChannelDirective::PublishGroup,
        ChannelDirective::PublishSession,
    ];

    /// Query parameter spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelDirective::SubscribeBroadcast => "subscribe-broadcast",
            ChannelDirective::SubscribeUser => "subscribe-user",
            ChannelDirective::SubscribeGroup => "subscribe-group",
            ChannelDirective::SubscribeSession => "subscribe-session",
            ChannelDirective::PublishBroadcast => "publish-broadcast",
            ChannelDirective::PublishUser => "publish-user",
            ChannelDirective::PublishGroup => "publish-group",
            ChannelDirective::PublishSession => "publish-session",
        }
    }

    /// Whether this asks to receive rather than to send.
    #[must_use]
    pub fn is_subscribe(self) -> bool {
        matches!(
            self,
            ChannelDirective::SubscribeBroadcast
                | ChannelDirective::SubscribeUser
                | ChannelDirective::SubscribeGroup
                | ChannelDirective::SubscribeSession
        )
    }

    /// Audience the directive addresses.
    #[must_use]
    pub fn audience(self) -> Audience {
        match self {
            ChannelDirective::SubscribeBroadcast | ChannelDirective::PublishBroadcast => {
                Audience::Broadcast
            }
            ChannelDirective::SubscribeUser | ChannelDirective::PublishUser => Audience::User,
            ChannelDirective::SubscribeGroup | ChannelDirective::PublishGroup => Audience::Group,
            ChannelDirective::SubscribeSession | ChannelDirective::PublishSession => {
                Audience::Session
            }
        }
    }
}

impl fmt::Display for ChannelDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelDirective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| format!("unknown channel directive `{}`", s))
    }
}

/// Channels a client asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Requested directives
    pub directives: BTreeSet<ChannelDirective>,
    /// Whether the client wants its own messages echoed back
    pub echo: bool,
}

impl ChannelRequest {
    /// Parse the query string of an upgrade request.
    #[must_use]
    pub fn from_query(query: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> = query
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();

        let mut request = Self::default();
        for (name, _) in pairs {
            let param = name.trim().to_ascii_lowercase();
            if param == "echo" {
                request.echo = true;
            } else if let Ok(directive) = param.parse::<ChannelDirective>() {
                request.directives.insert(directive);
            }
        }
        request
    }

    /// Builder-style directive insertion.
    #[must_use]
    pub fn with(mut self, directive: ChannelDirective) -> Self {
        self.directives.insert(directive);
        self
    }

    /// Keep only directives present in `allowed`.
    #[must_use]
    pub fn restrict_to(mut self, allowed: &BTreeSet<ChannelDirective>) -> Self {
        self.directives.retain(|d| allowed.contains(d));
        self
    }

    /// Whether the directive was requested.
    #[must_use]
    pub fn contains(&self, directive: ChannelDirective) -> bool {
        self.directives.contains(&directive)
    }

    /// Descriptor for the channels to subscribe to; every audience is `SELF`.
    #[must_use]
    pub fn subscribe_descriptor(&self) -> AudienceDescriptor {
        self.descriptor(true)
    }

    /// Descriptor for the channels to publish on; every audience is `SELF`.
    #[must_use]
    pub fn publish_descriptor(&self) -> AudienceDescriptor {
        self.descriptor(false)
    }

    fn descriptor(&self, subscribe: bool) -> AudienceDescriptor {
        let mut descriptor = AudienceDescriptor::new();
        for directive in self.directives.iter().filter(|d| d.is_subscribe() == subscribe) {
            descriptor = match directive.audience() {
                Audience::Broadcast => descriptor.broadcast(),
                Audience::User => descriptor.user(Address::SelfRef),
                Audience::Group => descriptor.group(Address::SelfRef),
                Audience::Session => descriptor.session(Address::SelfRef),
            };
        }
        descriptor
    }
}

impl fmt::Display for ChannelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.directives.iter().map(|d| d.as_str()).collect();
        write!(f, "[{}]", names.join(", "))?;
        if self.echo {
            f.write_str(" +echo")?;
        }
        Ok(())
    }
}
