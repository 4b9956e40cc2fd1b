//! Mutable state threaded through the chain.
//!
//! [`MiddlewareContext`] is where stages record what they learned: the auth
//! stage stores the [`Principal`], the enrich stage freezes everything into an
//! immutable [`RequestContext`] for the handler.

use crate::claims::AuthFailure;
use agora_core::{Caller, Principal, RequestContext, RequestId, TraceId};
use std::sync::Arc;
use tokio::time::Instant;

/// Per-request state owned by the chain.
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    client_ip: String,
    started_at: Instant,
    principal: Option<Principal>,
    auth_failure: Option<AuthFailure>,
    request_context: Option<Arc<RequestContext>>,
}

impl MiddlewareContext {
    /// Creates a context for a request from `client_ip`, with a fresh request ID.
    #[must_use]
    pub fn new(client_ip: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            client_ip: client_ip.into(),
            started_at: Instant::now(),
            principal: None,
            auth_failure: None,
            request_context: None,
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the client IP.
    #[must_use]
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Returns when the request entered the chain.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the authenticated principal, if the auth stage ran and succeeded.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Records the authenticated principal.
    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Returns why authentication failed, if it did.
    #[must_use]
    pub const fn auth_failure(&self) -> Option<AuthFailure> {
        self.auth_failure
    }

    /// Records an authentication failure.
    pub fn set_auth_failure(&mut self, failure: AuthFailure) {
        self.auth_failure = Some(failure);
    }

    /// Returns the caller as seen so far.
    #[must_use]
    pub fn caller(&self) -> Caller {
        self.principal
            .clone()
            .map_or(Caller::Anonymous, Caller::Authenticated)
    }

    /// Returns the frozen request context, once enrichment has run.
    #[must_use]
    pub const fn request_context(&self) -> Option<&Arc<RequestContext>> {
        self.request_context.as_ref()
    }

    /// Returns the trace ID, once enrichment has run.
    #[must_use]
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.request_context.as_deref().map(RequestContext::trace_id)
    }

    pub(crate) fn set_request_context(&mut self, context: RequestContext) {
        self.request_context = Some(Arc::new(context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn caller_tracks_principal() {
        let mut ctx = MiddlewareContext::new("198.51.100.4");
        assert!(ctx.caller().is_anonymous());
        let now = Utc::now();
        ctx.set_principal(Principal::new(5, now, now + Duration::hours(1)));
        assert_eq!(ctx.caller().user_id(), Some(5));
    }

    #[test]
    fn request_ids_are_fresh() {
        let a = MiddlewareContext::new("a");
        let b = MiddlewareContext::new("a");
        assert_ne!(a.request_id(), b.request_id());
        assert!(a.trace_id().is_none());
    }
}
