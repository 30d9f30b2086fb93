//! Request context providers
//!
//! Authentication happens elsewhere; the gateway only asks a provider to turn
//! the upgrade request into a [`RequestContext`] once, before subscribing.

use wsbridge_core::RequestContext;
use wsbridge_protocol::UpgradeRequest;

/// Produces the request context for an upgrade request
pub trait ContextProvider: Send + Sync {
    /// Context for `request`. Must not block.
    fn context(&self, request: &UpgradeRequest) -> RequestContext;
}

impl<F> ContextProvider for F
where
    F: Fn(&UpgradeRequest) -> RequestContext + Send + Sync,
{
    fn context(&self, request: &UpgradeRequest) -> RequestContext {
        self(request)
    }
}

/// Reads the session key from a cookie; identity and groups stay empty.
#[derive(Debug, Clone)]
pub struct CookieSessionProvider {
    cookie_name: String,
}

impl CookieSessionProvider {
    /// Provider reading the cookie named `cookie_name`.
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }
}

impl Default for CookieSessionProvider {
    fn default() -> Self {
        Self::new("sessionid")
    }
}

impl ContextProvider for CookieSessionProvider {
    fn context(&self, request: &UpgradeRequest) -> RequestContext {
        RequestContext {
            session_key: request.cookie(&self.cookie_name).filter(|s| !s.is_empty()),
            ..RequestContext::default()
        }
    }
}
