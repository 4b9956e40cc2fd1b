//! Rate-limit stage.
//!
//! The same stage type serves both positions in the chain: keyed by client IP
//! before auth, and by user ID after it.

use crate::context::MiddlewareContext;
use crate::limiter::{BucketSpec, LimitScope, RateLimitKey, RateLimiter};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use agora_core::AgoraError;
use std::sync::Arc;
use std::time::Duration;

/// Wait advertised when a fail-closed limiter is unreachable.
const UNAVAILABLE_RETRY_AFTER: Duration = Duration::from_secs(1);

/// What to do when the limiter itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Admit the request.
    #[default]
    Open,
    /// Deny the request with 429.
    Closed,
}

/// Takes a token from the caller's bucket before continuing.
pub struct RateLimitStage {
    scope: LimitScope,
    spec: BucketSpec,
    limiter: Arc<dyn RateLimiter>,
    fail_mode: FailMode,
}

impl std::fmt::Debug for RateLimitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitStage")
            .field("scope", &self.scope)
            .field("spec", &self.spec)
            .field("fail_mode", &self.fail_mode)
            .finish_non_exhaustive()
    }
}

impl RateLimitStage {
    /// Per-IP limiting.
    #[must_use]
    pub fn per_ip(limiter: Arc<dyn RateLimiter>, spec: BucketSpec, fail_mode: FailMode) -> Self {
        Self {
            scope: LimitScope::Ip,
            spec,
            limiter,
            fail_mode,
        }
    }

    /// Per-user limiting. Must run after auth.
    #[must_use]
    pub fn per_principal(
        limiter: Arc<dyn RateLimiter>,
        spec: BucketSpec,
        fail_mode: FailMode,
    ) -> Self {
        Self {
            scope: LimitScope::Principal,
            spec,
            limiter,
            fail_mode,
        }
    }

    fn key(&self, ctx: &MiddlewareContext) -> Option<RateLimitKey> {
        match self.scope {
            LimitScope::Ip => Some(RateLimitKey::ip(ctx.client_ip())),
            LimitScope::Principal => ctx
                .principal()
                .map(|principal| RateLimitKey::principal(principal.user_id())),
        }
    }

    fn deny(retry_after: Duration) -> Response {
        Response::from_error(&AgoraError::rate_limited(
            "rate limit exceeded",
            Some(retry_after),
        ))
    }
}

impl Middleware for RateLimitStage {
    fn name(&self) -> &'static str {
        match self.scope {
            LimitScope::Ip => "ip-rate-limit",
            LimitScope::Principal => "principal-rate-limit",
        }
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let scope = self.scope.as_str();
            let Some(key) = self.key(ctx) else {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    "principal rate limit reached without an authenticated principal"
                );
                return Response::from_error(&AgoraError::internal("internal error"));
            };

            match self.limiter.check(&key, self.spec).await {
                Ok(decision) if decision.allowed => {
                    agora_telemetry::record_rate_limit(scope, "allowed");
                    next.run(ctx, request).await
                }
                Ok(decision) => {
                    agora_telemetry::record_rate_limit(scope, "denied");
                    tracing::debug!(
                        key = %key,
                        retry_after_ms = u64::try_from(decision.retry_after.as_millis()).unwrap_or(u64::MAX),
                        "rate limit exceeded"
                    );
                    Self::deny(decision.retry_after)
                }
                Err(err) => {
                    agora_telemetry::record_rate_limit(scope, "error");
                    match self.fail_mode {
                        FailMode::Open => {
                            tracing::warn!(key = %key, error = %err, "rate limiter unavailable, admitting");
                            next.run(ctx, request).await
                        }
                        FailMode::Closed => {
                            tracing::warn!(key = %key, error = %err, "rate limiter unavailable, denying");
                            Self::deny(UNAVAILABLE_RETRY_AFTER)
                        }
                    }
                }
            }
        })
    }
}
