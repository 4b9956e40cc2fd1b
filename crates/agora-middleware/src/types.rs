//! Request and response types used by the gateway chain.

use agora_core::AgoraError;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::StatusCode;
use http_body_util::Full;
use std::time::Duration;

/// The HTTP request type flowing through the chain.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type produced by the chain.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building JSON responses.
pub trait ResponseExt {
    /// Creates a JSON response with the given status.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;

    /// Renders an [`AgoraError`] as `{"error": "<message>"}` with its status.
    ///
    /// Rate-limited errors carry a `Retry-After` header.
    fn from_error(error: &AgoraError) -> Response;
}

impl ResponseExt for Response {
    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn from_error(error: &AgoraError) -> Response {
        let mut response = Self::json(error.status_code(), &error.to_body());
        if let Some(retry_after) = error.retry_after() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
        }
        response
    }
}

/// Longest `Retry-After` the gateway advertises, in seconds.
pub const MAX_RETRY_AFTER_SECS: u64 = 24 * 60 * 60;

/// Whole seconds for a `Retry-After` header: rounded up, at least one, at
/// most [`MAX_RETRY_AFTER_SECS`].
#[must_use]
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait
        .as_secs()
        .saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.clamp(1, MAX_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_has_stable_body() {
        let response = Response::from_error(&AgoraError::forbidden("not allowed"));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let err = AgoraError::rate_limited("slow down", Some(Duration::from_millis(1200)));
        let response = Response::from_error(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "2");
    }

    #[test]
    fn retry_after_rounds_up_with_floor_of_one() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::from_millis(3001)), 4);
    }

    #[test]
    fn unbounded_wait_is_capped() {
        assert_eq!(retry_after_secs(Duration::MAX), MAX_RETRY_AFTER_SECS);
        assert_eq!(
            retry_after_secs(Duration::from_secs(MAX_RETRY_AFTER_SECS + 1)),
            MAX_RETRY_AFTER_SECS
        );
    }

    #[test]
    fn near_zero_refill_still_renders_retry_after() {
        let now = tokio::time::Instant::now();
        let mut bucket = crate::limiter::TokenBucket::new(crate::BucketSpec::new(1, 1e-20), now);
        assert!(bucket.try_take(now).allowed);
        let denied = bucket.try_take(now);
        assert!(!denied.allowed);

        let err = AgoraError::rate_limited("slow down", Some(denied.retry_after));
        let response = Response::from_error(&err);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).unwrap(),
            MAX_RETRY_AFTER_SECS.to_string().as_str()
        );
    }
}
