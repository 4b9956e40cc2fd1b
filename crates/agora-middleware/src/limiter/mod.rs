//! Token-bucket rate limiting.
//!
//! A [`RateLimiter`] answers `check(key, spec)` with a [`Decision`]. Checks
//! against the same key are serialized: two concurrent checks never both
//! succeed when only one token was available.
//!
//! ## Example
//!
//! ```
//! use agora_middleware::limiter::{BucketSpec, InMemoryRateLimiter, RateLimitKey};
//!
//! let limiter = InMemoryRateLimiter::new();
//! let key = RateLimitKey::ip("203.0.113.1");
//! let spec = BucketSpec::new(2, 1.0);
//!
//! assert!(limiter.check_now(&key, spec).allowed);
//! assert!(limiter.check_now(&key, spec).allowed);
//! assert!(!limiter.check_now(&key, spec).allowed);
//! ```

mod bucket;
mod memory;

pub use bucket::TokenBucket;
pub use memory::InMemoryRateLimiter;

use agora_core::UserId;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// What a rate-limit key identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LimitScope {
    /// Keyed by client IP.
    Ip,
    /// Keyed by authenticated user ID.
    Principal,
}

impl LimitScope {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Principal => "principal",
        }
    }
}

/// A (scope, identity) pair naming one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey {
    scope: LimitScope,
    identity: String,
}

impl RateLimitKey {
    /// Key for a client IP.
    #[must_use]
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            scope: LimitScope::Ip,
            identity: ip.into(),
        }
    }

    /// Key for an authenticated user.
    #[must_use]
    pub fn principal(user_id: UserId) -> Self {
        Self {
            scope: LimitScope::Principal,
            identity: user_id.to_string(),
        }
    }

    /// Returns the scope.
    #[must_use]
    pub const fn scope(&self) -> LimitScope {
        self.scope
    }

    /// Returns the identity string.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.as_str(), self.identity)
    }
}

/// Bucket shape: burst capacity and sustained refill rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    /// Maximum tokens held.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

impl BucketSpec {
    /// Creates a spec.
    #[must_use]
    pub const fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether a token was taken.
    pub allowed: bool,
    /// How long until a token will be available. Zero when allowed.
    pub retry_after: Duration,
    /// Whole tokens left after this check.
    pub remaining: u32,
}

impl Decision {
    /// An admitting decision.
    #[must_use]
    pub const fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
            remaining,
        }
    }

    /// A denying decision.
    #[must_use]
    pub const fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
            remaining: 0,
        }
    }
}

/// Errors from the limiter's backing store.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The backing store could not be reached.
    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),
}

/// A rate limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Takes one token from the bucket for `key`, creating it full if absent.
    async fn check(&self, key: &RateLimitKey, spec: BucketSpec) -> Result<Decision, LimiterError>;
}
