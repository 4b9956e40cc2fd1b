//! Downstream failure classification.
//!
//! Inter-service calls fail with an [`RpcStatus`]. Handlers call [`classify`]
//! exactly once per failure and either return the mapped HTTP status directly
//! or convert the status into an [`AgoraError`]. This is the only place the
//! translation table lives.
//!
//! | Downstream code | Kind | HTTP |
//! |-----------------|------|------|
//! | `not_found` | not_found | 404 |
//! | `permission_denied` | forbidden | 403 |
//! | `invalid_argument` | bad_request | 400 |
//! | `unauthenticated` | unauthorized | 401 |
//! | `resource_exhausted` | rate_limited | 429 |
//! | `unavailable`, `deadline_exceeded` | upstream_unavailable | 503 |
//! | `cancelled` | client_cancelled | 499 |
//! | anything else | internal | 500 |

use crate::error::{AgoraError, ErrorKind};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status codes of the inter-service transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcCode {
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// The request was malformed.
    InvalidArgument,
    /// The deadline expired before the operation completed.
    DeadlineExceeded,
    /// The requested entity was not found.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// The caller lacks permission.
    PermissionDenied,
    /// A quota or resource was exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented.
    Unimplemented,
    /// Internal error in the callee.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss.
    DataLoss,
    /// The request lacked valid credentials.
    Unauthenticated,
}

impl RpcCode {
    /// Every failure code, in wire order.
    pub const ALL: [RpcCode; 16] = [
        Self::Cancelled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    /// Returns the snake_case name of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed inter-service call.
///
/// # Example
///
/// ```
/// use agora_core::{AgoraError, RpcStatus};
/// use http::StatusCode;
///
/// let status = RpcStatus::unavailable("users", "connection refused");
/// let err = AgoraError::from(status);
/// assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} call failed ({code}): {message}")]
pub struct RpcStatus {
    code: RpcCode,
    service: String,
    message: String,
}

impl RpcStatus {
    /// Creates a status for a failed call to `service`.
    #[must_use]
    pub fn new(code: RpcCode, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            service: service.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an `unavailable` status.
    #[must_use]
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unavailable, service, message)
    }

    /// Shorthand for a `deadline_exceeded` status.
    #[must_use]
    pub fn deadline_exceeded(service: impl Into<String>) -> Self {
        Self::new(RpcCode::DeadlineExceeded, service, "deadline exceeded")
    }

    /// Returns the transport code.
    #[must_use]
    pub const fn code(&self) -> RpcCode {
        self.code
    }

    /// Returns the name of the service that failed.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the low-level message. Kept for telemetry only.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classifies this failure.
    #[must_use]
    pub fn classify(&self) -> Classification {
        classify(self.code)
    }
}

/// Result of classifying a downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// HTTP status to return to the client.
    pub status: StatusCode,
    /// Stable error kind.
    pub kind: ErrorKind,
}

/// Maps a transport code to an HTTP status and stable error kind.
///
/// Pure and total: every code maps to exactly one classification.
///
/// # Example
///
/// ```
/// use agora_core::{classify, ErrorKind, RpcCode};
/// use http::StatusCode;
///
/// let c = classify(RpcCode::PermissionDenied);
/// assert_eq!(c.status, StatusCode::FORBIDDEN);
/// assert_eq!(c.kind, ErrorKind::Forbidden);
/// ```
#[must_use]
pub fn classify(code: RpcCode) -> Classification {
    let kind = match code {
        RpcCode::NotFound => ErrorKind::NotFound,
        RpcCode::PermissionDenied => ErrorKind::Forbidden,
        RpcCode::InvalidArgument => ErrorKind::BadRequest,
        RpcCode::Unauthenticated => ErrorKind::Unauthorized,
        RpcCode::ResourceExhausted => ErrorKind::RateLimited,
        RpcCode::Unavailable | RpcCode::DeadlineExceeded => ErrorKind::UpstreamUnavailable,
        RpcCode::Cancelled => ErrorKind::ClientCancelled,
        RpcCode::Unknown
        | RpcCode::AlreadyExists
        | RpcCode::FailedPrecondition
        | RpcCode::Aborted
        | RpcCode::OutOfRange
        | RpcCode::Unimplemented
        | RpcCode::Internal
        | RpcCode::DataLoss => ErrorKind::Internal,
    };
    Classification {
        status: kind.status_code(),
        kind,
    }
}

/// Client-visible message for a classified failure. The low-level message
/// from the callee is deliberately left out.
fn client_message(kind: ErrorKind, service: &str) -> String {
    match kind {
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Forbidden => "forbidden".to_string(),
        ErrorKind::BadRequest => "invalid request".to_string(),
        ErrorKind::Unauthorized => "unauthorized".to_string(),
        ErrorKind::RateLimited => format!("{service} is rate limiting requests"),
        ErrorKind::UpstreamUnavailable => format!("{service} service unavailable"),
        ErrorKind::ClientCancelled => "request cancelled".to_string(),
        ErrorKind::Conflict | ErrorKind::Internal => "internal error".to_string(),
    }
}

impl From<RpcStatus> for AgoraError {
    fn from(status: RpcStatus) -> Self {
        let Classification { kind, .. } = status.classify();
        let message = client_message(kind, status.service());
        match kind {
            ErrorKind::UpstreamUnavailable => Self::UpstreamUnavailable {
                message,
                service: Some(status.service().to_string()),
            },
            ErrorKind::Internal => Self::internal_with_source(message, status),
            other => Self::from_kind(other, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_matches_taxonomy() {
        let expected = [
            (RpcCode::NotFound, 404),
            (RpcCode::PermissionDenied, 403),
            (RpcCode::InvalidArgument, 400),
            (RpcCode::Unauthenticated, 401),
            (RpcCode::ResourceExhausted, 429),
            (RpcCode::Unavailable, 503),
            (RpcCode::DeadlineExceeded, 503),
            (RpcCode::Cancelled, 499),
            (RpcCode::Internal, 500),
            (RpcCode::Unknown, 500),
            (RpcCode::AlreadyExists, 500),
            (RpcCode::DataLoss, 500),
        ];
        for (code, status) in expected {
            assert_eq!(classify(code).status.as_u16(), status, "code {code}");
        }
    }

    #[test]
    fn unavailable_becomes_upstream_unavailable() {
        let err = AgoraError::from(RpcStatus::unavailable("users", "dial tcp: refused"));
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(err.message(), "users service unavailable");
        assert!(!err.to_body().to_string().contains("refused"));
    }

    #[test]
    fn internal_keeps_status_as_source() {
        let err = AgoraError::from(RpcStatus::new(RpcCode::DataLoss, "media", "disk gone"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("media call failed (data_loss): disk gone"));
    }

    fn any_code() -> impl Strategy<Value = RpcCode> {
        (0..RpcCode::ALL.len()).prop_map(|i| RpcCode::ALL[i])
    }

    proptest! {
        #[test]
        fn classification_is_consistent(code in any_code()) {
            let c = classify(code);
            prop_assert_eq!(c.status, c.kind.status_code());
            prop_assert_eq!(classify(code), c);
            let err = AgoraError::from(RpcStatus::new(code, "svc", "detail"));
            prop_assert_eq!(err.status_code(), c.status);
        }
    }
}
