//! Request context
//!
//! Who is on the other end of a connection, as far as channel addressing is
//! concerned. It is produced once per upgrade request by an external
//! collaborator and never refreshed while the connection lives.

use serde::{Deserialize, Serialize};

/// Identity attached to one upgrade request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated user name
    pub identity: Option<String>,
    /// Browser session key
    pub session_key: Option<String>,
    /// Cached group memberships, populated at login time
    pub groups: Option<Vec<String>>,
}

impl RequestContext {
    /// Anonymous context without a session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set the authenticated identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the session key.
    #[must_use]
    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Set the cached group memberships.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Whether an identity is attached.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Group memberships, empty when none are cached.
    #[must_use]
    pub fn group_list(&self) -> &[String] {
        self.groups.as_deref().unwrap_or_default()
    }
}
