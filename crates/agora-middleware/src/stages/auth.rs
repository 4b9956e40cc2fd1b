//! Authentication stage.

use crate::claims::{extract_credential, AuthFailure, TokenVerifier};
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use agora_core::{AgoraError, Clock};
use std::sync::Arc;

/// Verifies the caller's credential and records the [`agora_core::Principal`].
///
/// Every failure answers 401 with the same body; the reason goes to logs and
/// the `agora_auth_failures_total` counter.
#[derive(Debug)]
pub struct AuthStage {
    verifier: TokenVerifier,
    cookie_name: String,
    clock: Arc<dyn Clock>,
}

impl AuthStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(verifier: TokenVerifier, cookie_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            verifier,
            cookie_name: cookie_name.into(),
            clock,
        }
    }

    fn reject(ctx: &mut MiddlewareContext, failure: AuthFailure) -> Response {
        ctx.set_auth_failure(failure);
        agora_telemetry::record_auth_failure(failure.as_str());
        tracing::info!(
            request_id = %ctx.request_id(),
            reason = failure.as_str(),
            "authentication failed"
        );
        Response::from_error(&AgoraError::unauthorized("unauthorized"))
    }
}

impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let verified = extract_credential(request.headers(), &self.cookie_name)
                .ok_or(AuthFailure::Missing)
                .and_then(|token| self.verifier.verify(token, self.clock.now()));
            match verified {
                Ok(principal) => {
                    ctx.set_principal(principal);
                    next.run(ctx, request).await
                }
                Err(failure) => Self::reject(ctx, failure),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::ok;
    use agora_core::ManualClock;
    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};

    const SECRET: &[u8] = b"stage-secret-of-sufficient-length";

    fn stage(clock: Arc<ManualClock>) -> AuthStage {
        let verifier = TokenVerifier::new(SECRET, std::time::Duration::ZERO).unwrap();
        AuthStage::new(verifier, "jwt", clock)
    }

    fn with_cookie(token: &str) -> Request {
        http::Request::builder()
            .uri("/post/read")
            .header(http::header::COOKIE, format!("jwt={token}"))
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn valid_cookie_sets_principal() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let stage = stage(Arc::clone(&clock));
        let token = stage.verifier.sign(11, clock.now(), Duration::minutes(5)).unwrap();
        let mut ctx = MiddlewareContext::new("127.0.0.1");
        let response = stage.process(&mut ctx, with_cookie(&token), ok()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.principal().unwrap().user_id(), 11);
    }

    #[tokio::test]
    async fn failures_share_one_body() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let stage = stage(Arc::clone(&clock));
        let token = stage.verifier.sign(11, clock.now(), Duration::minutes(5)).unwrap();
        clock.advance(Duration::minutes(10));

        let mut expired_ctx = MiddlewareContext::new("127.0.0.1");
        let expired = stage.process(&mut expired_ctx, with_cookie(&token), ok()).await;
        let mut invalid_ctx = MiddlewareContext::new("127.0.0.1");
        let invalid = stage.process(&mut invalid_ctx, with_cookie("garbage"), ok()).await;

        assert_eq!(expired_ctx.auth_failure(), Some(AuthFailure::Expired));
        assert_eq!(invalid_ctx.auth_failure(), Some(AuthFailure::Invalid));
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        let expired_body = expired.into_body().collect().await.unwrap().to_bytes();
        let invalid_body = invalid.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(expired_body, invalid_body);
        assert_eq!(&expired_body[..], br#"{"error":"unauthorized"}"#);
    }

    #[tokio::test]
    async fn missing_credential_is_401() {
        let stage = stage(Arc::new(ManualClock::new(Utc::now())));
        let mut ctx = MiddlewareContext::new("127.0.0.1");
        let request = http::Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = stage.process(&mut ctx, request, ok()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ctx.auth_failure(), Some(AuthFailure::Missing));
        assert!(ctx.principal().is_none());
    }
}
