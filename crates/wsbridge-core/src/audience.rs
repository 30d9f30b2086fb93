//! Audience descriptors
//!
//! Names whom to publish to or subscribe as. Addresses may be the
//! [`Address::SelfRef`] marker, which is substituted from the request context
//! when the descriptor is resolved, so descriptors can be built before any
//! request exists.
//!
//! When deserialised from JSON each address field accepts a list of strings
//! (the literal `"SELF"` being the marker). The older shapes `true` (meaning
//! `["SELF"]`) and a single string are still accepted but log a warning.

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::channel::Audience;
use crate::error::Error;

/// Wire spelling of the SELF marker.
pub const SELF_MARKER: &str = "SELF";

/// One entry of an address list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Resolve from the request context at resolution time
    SelfRef,
    /// A literal user name, group name or session key
    Literal(String),
}

impl Address {
    /// Literal address.
    pub fn literal(value: impl Into<String>) -> Self {
        Address::Literal(value.into())
    }

    /// Address from its wire spelling; `"SELF"` is the SELF marker.
    pub fn parse(value: impl Into<String>) -> Self {
        let value = value.into();
        if value == SELF_MARKER {
            Address::SelfRef
        } else {
            Address::Literal(value)
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Address::SelfRef => SELF_MARKER,
            Address::Literal(value) => value,
        }
    }
}

/// Whom a message is published to, or whom a connection subscribes as
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceDescriptor {
    /// Everyone listening on the facility
    pub broadcast: bool,
    /// User names
    #[serde(
        deserialize_with = "users_compat",
        serialize_with = "serialize_addresses"
    )]
    pub users: Vec<Address>,
    /// Group names
    #[serde(
        deserialize_with = "groups_compat",
        serialize_with = "serialize_addresses"
    )]
    pub groups: Vec<Address>,
    /// Session keys
    #[serde(
        deserialize_with = "sessions_compat",
        serialize_with = "serialize_addresses"
    )]
    pub sessions: Vec<Address>,
}

impl AudienceDescriptor {
    /// Empty descriptor addressing nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address everyone on the facility.
    #[must_use]
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Add a user address.
    #[must_use]
    pub fn user(mut self, address: Address) -> Self {
        self.users.push(address);
        self
    }

    /// Add a group address.
    #[must_use]
    pub fn group(mut self, address: Address) -> Self {
        self.groups.push(address);
        self
    }

    /// Add a session address.
    #[must_use]
    pub fn session(mut self, address: Address) -> Self {
        self.sessions.push(address);
        self
    }

    /// Addresses listed for a non-broadcast audience.
    #[must_use]
    pub fn addresses(&self, audience: Audience) -> &[Address] {
        match audience {
            Audience::Broadcast => &[],
            Audience::User => &self.users,
            Audience::Group => &self.groups,
            Audience::Session => &self.sessions,
        }
    }

    /// Whether the descriptor addresses nobody at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.broadcast && self.users.is_empty() && self.groups.is_empty() && self.sessions.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressesRepr {
    Flag(bool),
    Single(String),
    List(Vec<String>),
}

fn from_repr(field: &'static str, repr: AddressesRepr) -> Vec<Address> {
    match repr {
        AddressesRepr::List(values) => values.into_iter().map(Address::parse).collect(),
        AddressesRepr::Flag(false) => Vec::new(),
        AddressesRepr::Flag(true) => {
            warn!(field, "deprecated audience shape `true`, use [\"SELF\"]");
            vec![Address::SelfRef]
        }
        AddressesRepr::Single(value) => {
            warn!(field, value = %value, "deprecated audience shape: single string, wrap it in a list");
            vec![Address::parse(value)]
        }
    }
}

fn users_compat<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Address>, D::Error> {
    AddressesRepr::deserialize(d).map(|r| from_repr("users", r))
}

fn groups_compat<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Address>, D::Error> {
    AddressesRepr::deserialize(d).map(|r| from_repr("groups", r))
}

fn sessions_compat<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Address>, D::Error> {
    AddressesRepr::deserialize(d).map(|r| from_repr("sessions", r))
}

fn serialize_addresses<S: Serializer>(addresses: &[Address], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(addresses.len()))?;
    for address in addresses {
        seq.serialize_element(address.as_str())?;
    }
    seq.end()
}

/// Which persisted audience `fetch` looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchAudience {
    /// Session, then user, then groups, then broadcast
    #[default]
    Any,
    /// Only the given audience
    Only(Audience),
}

impl FetchAudience {
    /// Candidate audiences in lookup order.
    #[must_use]
    pub fn order(self) -> Vec<Audience> {
        match self {
            FetchAudience::Any => vec![
                Audience::Session,
                Audience::User,
                Audience::Group,
                Audience::Broadcast,
            ],
            FetchAudience::Only(audience) => vec![audience],
        }
    }
}

impl FromStr for FetchAudience {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            Ok(FetchAudience::Any)
        } else {
            s.parse().map(FetchAudience::Only)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_list_with_self_marker() {
        let desc: AudienceDescriptor =
            serde_json::from_str(r#"{"users": ["SELF", "mary"], "broadcast": true}"#).unwrap();
        assert!(desc.broadcast);
        assert_eq!(desc.users, vec![Address::SelfRef, Address::literal("mary")]);
        assert!(desc.groups.is_empty());
    }

    #[test]
    fn test_deserialize_legacy_shapes() {
        let desc: AudienceDescriptor =
            serde_json::from_str(r#"{"users": true, "groups": "admins", "sessions": false}"#)
                .unwrap();
        assert_eq!(desc.users, vec![Address::SelfRef]);
        assert_eq!(desc.groups, vec![Address::literal("admins")]);
        assert!(desc.sessions.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_other_shapes() {
        assert!(serde_json::from_str::<AudienceDescriptor>(r#"{"users": 5}"#).is_err());
    }

    #[test]
    fn test_serialize_uses_list_shape() {
        let desc = AudienceDescriptor::new()
            .user(Address::SelfRef)
            .group(Address::literal("staff"));
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "broadcast": false,
                "users": ["SELF"],
                "groups": ["staff"],
                "sessions": []
            })
        );
    }

    #[test]
    fn test_fetch_audience_order() {
        assert_eq!(
            FetchAudience::Any.order(),
            vec![
                Audience::Session,
                Audience::User,
                Audience::Group,
                Audience::Broadcast
            ]
        );
        assert_eq!(
            "group".parse::<FetchAudience>().unwrap(),
            FetchAudience::Only(Audience::Group)
        );
        assert!("nobody".parse::<FetchAudience>().is_err());
    }
}
