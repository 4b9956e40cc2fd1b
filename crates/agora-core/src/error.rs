//! Error taxonomy.
//!
//! [`AgoraError`] is the single error type handlers return. Every variant maps
//! to exactly one [`ErrorKind`] and one HTTP status. Lower layers wrap their
//! causes with a stable kind and a short message; the cause itself is kept for
//! telemetry and never rendered into the client-visible body.
//!
//! | Kind | HTTP status |
//! |------|-------------|
//! | `bad_request` | 400 |
//! | `unauthorized` | 401 |
//! | `forbidden` | 403 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `rate_limited` | 429 |
//! | `client_cancelled` | 499 |
//! | `internal` | 500 |
//! | `upstream_unavailable` | 503 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`AgoraError`].
pub type AgoraResult<T> = Result<T, AgoraError>;

/// Non-standard status used when the client went away before completion.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Stable error kinds exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed structural validation.
    BadRequest,
    /// Missing or invalid credential.
    Unauthorized,
    /// Credential valid but the audience check denied access.
    Forbidden,
    /// Entity or relation missing.
    NotFound,
    /// Unique-constraint or state-machine violation.
    Conflict,
    /// Admission denied by the rate limiter.
    RateLimited,
    /// A downstream service failed transiently.
    UpstreamUnavailable,
    /// The caller cancelled the request.
    ClientCancelled,
    /// Every remaining case.
    Internal,
}

impl ErrorKind {
    /// Returns the HTTP status code for this kind.
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ClientCancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the snake_case name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::ClientCancelled => "client_cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The standard error type for Agora handlers and services.
///
/// # Example
///
/// ```
/// use agora_core::{AgoraError, ErrorKind};
/// use http::StatusCode;
///
/// let err = AgoraError::not_found("post 42 not found");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
/// assert_eq!(err.to_body()["error"], "post 42 not found");
/// ```
#[derive(Error, Debug)]
pub enum AgoraError {
    /// Input failed structural validation.
    #[error("bad request: {message}")]
    BadRequest {
        /// Client-visible message.
        message: String,
    },

    /// Missing or invalid credential.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Client-visible message.
        message: String,
    },

    /// Audience check denied access.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Client-visible message.
        message: String,
    },

    /// Entity or relation missing.
    #[error("not found: {message}")]
    NotFound {
        /// Client-visible message.
        message: String,
    },

    /// Unique-constraint or state-machine violation.
    #[error("conflict: {message}")]
    Conflict {
        /// Client-visible message.
        message: String,
    },

    /// Admission denied by the rate limiter.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Client-visible message.
        message: String,
        /// How long the caller should wait before retrying.
        retry_after: Option<Duration>,
    },

    /// A downstream dependency failed transiently.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Client-visible message.
        message: String,
        /// Name of the failing dependency, for telemetry.
        service: Option<String>,
    },

    /// The caller cancelled the request.
    #[error("client cancelled: {message}")]
    ClientCancelled {
        /// Client-visible message.
        message: String,
    },

    /// Any other failure.
    #[error("internal error: {message}")]
    Internal {
        /// Client-visible message.
        message: String,
        /// Underlying cause, logged but never serialised.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl AgoraError {
    /// Creates a bad-request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a rate-limited error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates an upstream-unavailable error.
    #[must_use]
    pub fn upstream_unavailable(message: impl Into<String>, service: Option<&str>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            service: service.map(str::to_string),
        }
    }

    /// Creates a client-cancelled error.
    #[must_use]
    pub fn client_cancelled(message: impl Into<String>) -> Self {
        Self::ClientCancelled {
            message: message.into(),
        }
    }

    /// Creates an internal error without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error wrapping a cause.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Builds an error of the given kind with a message.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::BadRequest => Self::BadRequest { message },
            ErrorKind::Unauthorized => Self::Unauthorized { message },
            ErrorKind::Forbidden => Self::Forbidden { message },
            ErrorKind::NotFound => Self::NotFound { message },
            ErrorKind::Conflict => Self::Conflict { message },
            ErrorKind::RateLimited => Self::RateLimited {
                message,
                retry_after: None,
            },
            ErrorKind::UpstreamUnavailable => Self::UpstreamUnavailable {
                message,
                service: None,
            },
            ErrorKind::ClientCancelled => Self::ClientCancelled { message },
            ErrorKind::Internal => Self::Internal {
                message,
                source: None,
            },
        }
    }

    /// Returns the stable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::ClientCancelled { .. } => ErrorKind::ClientCancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Returns the client-visible message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::RateLimited { message, .. }
            | Self::UpstreamUnavailable { message, .. }
            | Self::ClientCancelled { message }
            | Self::Internal { message, .. } => message,
        }
    }

    /// Returns the retry hint for rate-limited errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Renders the client-visible body: `{"error": "<message>"}`.
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.message() })
    }
}
