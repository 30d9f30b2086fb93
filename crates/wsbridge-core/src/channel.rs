//! Channel keys
//!
//! A channel key is `{prefix}:{audience}:{address}:{facility}`; broadcast
//! channels have no address and the prefix segment is omitted when empty.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Recipient class a channel is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Everyone listening on the facility
    Broadcast,
    /// A named user
    User,
    /// Members of a group
    Group,
    /// A browser session
    Session,
}

impl Audience {
    /// Key segment for this audience.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Broadcast => "broadcast",
            Audience::User => "user",
            Audience::Group => "group",
            Audience::Session => "session",
        }
    }

    /// All audiences.
    pub const ALL: [Audience; 4] = [
        Audience::Broadcast,
        Audience::User,
        Audience::Group,
        Audience::Session,
    ];
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(Audience::Broadcast),
            "user" => Ok(Audience::User),
            "group" => Ok(Audience::Group),
            "session" => Ok(Audience::Session),
            other => Err(Error::InvalidAudience(other.to_string())),
        }
    }
}

/// Broker channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ChannelKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ChannelKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.0
    }
}

/// Builds channel keys for one deployment prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelNamer {
    prefix: String,
}

impl ChannelNamer {
    /// Namer for `prefix`; an empty prefix adds nothing to the key.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for an audience/address/facility triple.
    ///
    /// `address` is ignored for [`Audience::Broadcast`].
    #[must_use]
    pub fn key(&self, audience: Audience, address: Option<&str>, facility: &str) -> ChannelKey {
        let mut key = String::with_capacity(self.prefix.len() + facility.len() + 32);
        if !self.prefix.is_empty() {
            key.push_str(&self.prefix);
            key.push(':');
        }
        key.push_str(audience.as_str());
        key.push(':');
        if audience != Audience::Broadcast {
            if let Some(address) = address {
                key.push_str(address);
                key.push(':');
            }
        }
        key.push_str(facility);
        ChannelKey(key)
    }

    /// Broadcast key for a facility.
    #[must_use]
    pub fn broadcast(&self, facility: &str) -> ChannelKey {
        self.key(Audience::Broadcast, None, facility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let namer = ChannelNamer::new("ws");
        assert_eq!(namer.broadcast("chat").as_str(), "ws:broadcast:chat");
        assert_eq!(
            namer.key(Audience::User, Some("john"), "chat").as_str(),
            "ws:user:john:chat"
        );
        assert_eq!(
            namer.key(Audience::Broadcast, Some("ignored"), "chat").as_str(),
            "ws:broadcast:chat"
        );
    }

    #[test]
    fn test_empty_prefix_is_omitted() {
        let namer = ChannelNamer::default();
        assert_eq!(
            namer.key(Audience::Session, Some("abc"), "chat").as_str(),
            "session:abc:chat"
        );
    }

    #[test]
    fn test_keys_are_deterministic() {
        let a = ChannelNamer::new("p").key(Audience::Group, Some("admins"), "f");
        let b = ChannelNamer::new("p").key(Audience::Group, Some("admins"), "f");
        assert_eq!(a, b);
    }

    #[test]
    fn test_audience_parse() {
        for audience in Audience::ALL {
            assert_eq!(audience.as_str().parse::<Audience>().unwrap(), audience);
        }
        assert!("everyone".parse::<Audience>().is_err());
    }
}
