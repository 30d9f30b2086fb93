//! Facility registry and channel policies
//!
//! The registry is an ordered list of `(pattern, policy)` pairs chosen at
//! start-up. The first pattern matching the facility (anchored at the start)
//! selects the policy that narrows or rejects the requested channels.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

use wsbridge_core::RequestContext;

use crate::error::{Error, Result};
use crate::negotiate::{ChannelDirective, ChannelRequest};

/// Decides which of the requested channels a connection may use
#[cfg_attr(test, mockall::automock)]
pub trait ChannelPolicy: Send + Sync {
    /// Narrow `requested`, or reject it with [`Error::PermissionDenied`].
    ///
    /// # Errors
    ///
    /// `PermissionDenied` to abort the handshake with 403.
    fn allowed_channels(
        &self,
        ctx: &RequestContext,
        facility: &str,
        requested: ChannelRequest,
    ) -> Result<ChannelRequest>;
}

/// Keeps the fixed vocabulary, optionally restricted to a configured subset
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    allow: Option<BTreeSet<ChannelDirective>>,
}

impl DefaultPolicy {
    /// Policy allowing every directive.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Policy allowing only the listed directives.
    pub fn allowing(allow: impl IntoIterator<Item = ChannelDirective>) -> Self {
        Self {
            allow: Some(allow.into_iter().collect()),
        }
    }
}

impl ChannelPolicy for DefaultPolicy {
    fn allowed_channels(
        &self,
        _ctx: &RequestContext,
        _facility: &str,
        requested: ChannelRequest,
    ) -> Result<ChannelRequest> {
        Ok(match &self.allow {
            Some(allow) => requested.restrict_to(allow),
            None => requested,
        })
    }
}

/// Ordered facility pattern registry
#[derive(Clone, Default)]
pub struct FacilityRegistry {
    /// `None` matches every facility
    entries: Vec<(Option<Regex>, Arc<dyn ChannelPolicy>)>,
}

impl FacilityRegistry {
    /// Empty registry; every lookup fails until a pattern is registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry accepting every facility with the permissive policy.
    #[must_use]
    pub fn permissive() -> Self {
        let policy: Arc<dyn ChannelPolicy> = Arc::new(DefaultPolicy::permissive());
        Self {
            entries: vec![(None, policy)],
        }
    }

    /// Append a pattern; earlier registrations take precedence.
    ///
    /// # Errors
    ///
    /// Returns error if the pattern does not compile
    pub fn register(
        mut self,
        pattern: &str,
        policy: Arc<dyn ChannelPolicy>,
    ) -> std::result::Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        self.entries.push((Some(regex), policy));
        Ok(self)
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Policy for `facility`.
    ///
    /// # Errors
    ///
    /// `UnknownFacility` when no pattern matches.
    pub fn lookup(&self, facility: &str) -> Result<Arc<dyn ChannelPolicy>> {
        self.entries
            .iter()
            .find(|(regex, _)| regex.as_ref().map_or(true, |r| r.is_match(facility)))
            .map(|(_, policy)| Arc::clone(policy))
            .ok_or_else(|| Error::UnknownFacility(facility.to_string()))
    }
}

impl std::fmt::Debug for FacilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self
            .entries
            .iter()
            .map(|(r, _)| r.as_ref().map_or("*", Regex::as_str))
            .collect();
        f.debug_struct("FacilityRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChannelRequest {
        ChannelRequest::default()
            .with(ChannelDirective::SubscribeBroadcast)
            .with(ChannelDirective::PublishBroadcast)
    }

    #[test]
    fn test_default_policy_narrows() {
        let policy = DefaultPolicy::allowing([ChannelDirective::SubscribeBroadcast]);
        let allowed = policy
            .allowed_channels(&RequestContext::anonymous(), "chat", request())
            .unwrap();
        assert_eq!(
            allowed.directives,
            BTreeSet::from([ChannelDirective::SubscribeBroadcast])
        );

        let all = DefaultPolicy::permissive()
            .allowed_channels(&RequestContext::anonymous(), "chat", request())
            .unwrap();
        assert_eq!(all, request());
    }

    #[test]
    fn test_lookup_first_match_wins() {
        let mut admin = MockChannelPolicy::new();
        admin
            .expect_allowed_channels()
            .returning(|_, _, _| Err(Error::PermissionDenied("admins only".into())));

        let registry = FacilityRegistry::new()
            .register("admin", Arc::new(admin))
            .unwrap()
            .register(".*", Arc::new(DefaultPolicy::permissive()))
            .unwrap();

        let ctx = RequestContext::anonymous();
        assert!(matches!(
            registry
                .lookup("admin-console")
                .unwrap()
                .allowed_channels(&ctx, "admin-console", request()),
            Err(Error::PermissionDenied(_))
        ));
        assert!(registry
            .lookup("chat")
            .unwrap()
            .allowed_channels(&ctx, "chat", request())
            .is_ok());
    }

    #[test]
    fn test_lookup_is_anchored_at_start() {
        let registry = FacilityRegistry::new()
            .register("room", Arc::new(DefaultPolicy::permissive()))
            .unwrap();
        assert!(registry.lookup("room42").is_ok());
        assert!(matches!(
            registry.lookup("myroom"),
            Err(Error::UnknownFacility(_))
        ));
    }

    #[test]
    fn test_mock_policy_receives_context() {
        let mut policy = MockChannelPolicy::new();
        policy
            .expect_allowed_channels()
            .withf(|ctx, facility, _| ctx.identity.as_deref() == Some("john") && facility == "chat")
            .times(1)
            .returning(|_, _, requested| {
                Ok(requested.restrict_to(&BTreeSet::from([ChannelDirective::SubscribeBroadcast])))
            });

        let ctx = RequestContext::anonymous().with_identity("john");
        let allowed = policy.allowed_channels(&ctx, "chat", request()).unwrap();
        assert_eq!(allowed.directives.len(), 1);
    }

    #[test]
    fn test_permissive_accepts_everything() {
        let registry = FacilityRegistry::permissive();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("").is_ok());
        assert!(registry.lookup("any/thing").is_ok());
        assert!(FacilityRegistry::new().lookup("chat").is_err());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(FacilityRegistry::new()
            .register("(", Arc::new(DefaultPolicy::permissive()))
            .is_err());
    }
}
