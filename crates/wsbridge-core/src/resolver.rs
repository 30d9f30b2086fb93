//! Channel resolution
//!
//! Turns an [`AudienceDescriptor`] into concrete channel keys for one request
//! context and facility. `SELF` entries are substituted here, from the
//! context's identity, session key or cached group list; entries that cannot
//! be substituted (anonymous request, no session) contribute nothing.

use std::collections::BTreeSet;
use tracing::debug;

use crate::audience::{Address, AudienceDescriptor};
use crate::channel::{Audience, ChannelKey, ChannelNamer};
use crate::context::RequestContext;

impl ChannelNamer {
    /// Resolve a descriptor to a deduplicated set of channel keys.
    #[must_use]
    pub fn resolve(
        &self,
        descriptor: &AudienceDescriptor,
        ctx: &RequestContext,
        facility: &str,
    ) -> BTreeSet<ChannelKey> {
        let mut channels = BTreeSet::new();
        if descriptor.broadcast {
            channels.insert(self.broadcast(facility));
        }
        for audience in [Audience::User, Audience::Group, Audience::Session] {
            for address in descriptor.addresses(audience) {
                for resolved in self_or_literal(audience, address, ctx) {
                    channels.insert(self.key(audience, Some(resolved), facility));
                }
            }
        }
        channels
    }
}

/// Resolve a descriptor with a namer; see [`ChannelNamer::resolve`].
#[must_use]
pub fn resolve(
    namer: &ChannelNamer,
    descriptor: &AudienceDescriptor,
    ctx: &RequestContext,
    facility: &str,
) -> BTreeSet<ChannelKey> {
    namer.resolve(descriptor, ctx, facility)
}

fn self_or_literal<'a>(
    audience: Audience,
    address: &'a Address,
    ctx: &'a RequestContext,
) -> Vec<&'a str> {
    match address {
        Address::Literal(value) => vec![value.as_str()],
        Address::SelfRef => {
            let resolved: Vec<&str> = match audience {
                Audience::User => ctx.identity.as_deref().into_iter().collect(),
                // Group membership only counts for an authenticated identity
                Audience::Group if ctx.is_authenticated() => {
                    ctx.group_list().iter().map(String::as_str).collect()
                }
                Audience::Group => Vec::new(),
                Audience::Session => ctx.session_key.as_deref().into_iter().collect(),
                Audience::Broadcast => Vec::new(),
            };
            if resolved.is_empty() {
                debug!(audience = %audience, "SELF not resolvable for this request");
            }
            resolved
        }
    }
}
