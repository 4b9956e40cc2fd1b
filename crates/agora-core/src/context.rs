//! Request context.
//!
//! The [`RequestContext`] is the typed, immutable record every component
//! receives by reference. The gateway builds it once authentication and
//! enrichment are done; nothing mutates it afterwards.

use crate::classify::RpcStatus;
use crate::ids::{RequestId, TraceId, UserId};
use crate::principal::{Caller, Principal};
use crate::AgoraError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Per-request ambient state.
///
/// # Example
///
/// ```
/// use agora_core::{Caller, RequestContext};
///
/// let ctx = RequestContext::builder().client_ip("203.0.113.1").build();
/// assert_eq!(ctx.client_ip(), "203.0.113.1");
/// assert!(ctx.caller().is_anonymous());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: TraceId,
    request_id: RequestId,
    client_ip: String,
    caller: Caller,
    started_at: Instant,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a builder with a fresh trace ID and request ID.
    #[must_use]
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::new()
    }

    /// Creates an anonymous context for tests.
    #[must_use]
    pub fn mock() -> Self {
        Self::builder().client_ip("127.0.0.1").build()
    }

    /// Creates an authenticated context for tests.
    #[must_use]
    pub fn mock_for(user_id: UserId) -> Self {
        let now = chrono::Utc::now();
        Self::builder()
            .client_ip("127.0.0.1")
            .caller(Caller::Authenticated(Principal::new(
                user_id,
                now,
                now + chrono::Duration::hours(1),
            )))
            .build()
    }

    /// Returns the trace ID.
    #[must_use]
    pub const fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the client IP as seen by the gateway.
    #[must_use]
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Returns the caller.
    #[must_use]
    pub const fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Returns the principal, if authenticated.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.caller.principal()
    }

    /// Returns the principal or an internal error.
    ///
    /// Routes that require auth always carry a principal; reaching this error
    /// means a route was wired without its auth stage.
    pub fn require_principal(&self) -> Result<&Principal, AgoraError> {
        self.principal()
            .ok_or_else(|| AgoraError::internal("authenticated principal missing from context"))
    }

    /// Returns when the request entered the gateway.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline. `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Runs a downstream call under this request's deadline.
    ///
    /// If the deadline passes first the call is dropped (aborting it) and a
    /// `deadline_exceeded` status for `service` is returned.
    pub async fn call<T, F>(&self, service: &str, call: F) -> Result<T, RpcStatus>
    where
        F: Future<Output = Result<T, RpcStatus>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .unwrap_or_else(|_| Err(RpcStatus::deadline_exceeded(service))),
            None => call.await,
        }
    }
}

/// Builder for [`RequestContext`].
#[derive(Debug)]
pub struct RequestContextBuilder {
    trace_id: Option<TraceId>,
    request_id: RequestId,
    client_ip: String,
    caller: Caller,
    started_at: Instant,
    deadline: Option<Instant>,
}

impl RequestContextBuilder {
    fn new() -> Self {
        Self {
            trace_id: None,
            request_id: RequestId::new(),
            client_ip: String::new(),
            caller: Caller::Anonymous,
            started_at: Instant::now(),
            deadline: None,
        }
    }

    /// Sets the trace ID. A fresh one is minted if unset.
    #[must_use]
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the request ID.
    #[must_use]
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Sets the client IP.
    #[must_use]
    pub fn client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    /// Sets the caller.
    #[must_use]
    pub fn caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    /// Sets the start time.
    #[must_use]
    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Sets the deadline as an offset from the start time.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(self.started_at + timeout);
        self
    }

    /// Finalizes the context.
    #[must_use]
    pub fn build(self) -> RequestContext {
        RequestContext {
            trace_id: self.trace_id.unwrap_or_else(TraceId::generate),
            request_id: self.request_id,
            client_ip: self.client_ip,
            caller: self.caller,
            started_at: self.started_at,
            deadline: self.deadline,
        }
    }
}
