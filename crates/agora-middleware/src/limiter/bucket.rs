//! Token bucket.

use super::{BucketSpec, Decision};
use std::time::Duration;
use tokio::time::Instant;

/// A refillable counter for one rate-limit key.
///
/// Tokens are fractional and always within `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    spec: BucketSpec,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(spec: BucketSpec, now: Instant) -> Self {
        Self {
            spec,
            tokens: f64::from(spec.capacity),
            last_refill: now,
        }
    }

    /// Returns the bucket's spec.
    #[must_use]
    pub const fn spec(&self) -> BucketSpec {
        self.spec
    }

    /// Returns the current token count, as of the last refill.
    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Applies a new spec, clamping the current tokens to the new capacity.
    pub fn reconfigure(&mut self, spec: BucketSpec, now: Instant) {
        self.refill(now);
        self.spec = spec;
        self.tokens = self.tokens.min(f64::from(spec.capacity));
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = elapsed.as_secs_f64() * self.spec.refill_per_second;
        self.tokens = (self.tokens + added).clamp(0.0, f64::from(self.spec.capacity));
        self.last_refill = now;
    }

    /// Refills, then takes one token if available.
    pub fn try_take(&mut self, now: Instant) -> Decision {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::allow(self.remaining())
        } else {
            let wait = (1.0 - self.tokens) / self.spec.refill_per_second;
            Decision::deny(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn remaining(&self) -> u32 {
        self.tokens.floor() as u32
    }

    /// Time since the bucket was last touched.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }

    /// Idle time after which the bucket is full again and can be evicted.
    #[must_use]
    pub fn refill_cycle(&self) -> Duration {
        let secs = f64::from(self.spec.capacity) / self.spec.refill_per_second;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(capacity: u32, refill_per_second: f64) -> BucketSpec {
        BucketSpec::new(capacity, refill_per_second)
    }

    #[test]
    fn starts_full_and_drains() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(spec(3, 1.0), now);
        assert!(bucket.try_take(now).allowed);
        assert!(bucket.try_take(now).allowed);
        let last = bucket.try_take(now);
        assert!(last.allowed);
        assert_eq!(last.remaining, 0);
        assert!(!bucket.try_take(now).allowed);
    }

    #[test]
    fn retry_after_is_time_to_next_token() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(spec(1, 4.0), now);
        bucket.try_take(now);
        let denied = bucket.try_take(now);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(250));
    }

    #[test]
    fn refill_is_clamped_to_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(spec(5, 100.0), now);
        bucket.try_take(now);
        bucket.try_take(now + Duration::from_secs(60));
        assert!((bucket.tokens() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reconfigure_clamps_tokens() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(spec(10, 1.0), now);
        bucket.reconfigure(spec(2, 1.0), now);
        assert!((bucket.tokens() - 2.0).abs() < f64::EPSILON);
        assert_eq!(bucket.spec().capacity, 2);
    }

    #[test]
    fn refill_cycle_is_capacity_over_rate() {
        let bucket = TokenBucket::new(spec(20, 5.0), Instant::now());
        assert_eq!(bucket.refill_cycle(), Duration::from_secs(4));
    }
}
