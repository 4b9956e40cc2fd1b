//! In-process limiter over a sharded map.

use super::{BucketSpec, Decision, LimiterError, RateLimitKey, RateLimiter, TokenBucket};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default slack added to a bucket's refill cycle before it may be evicted.
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(30);

/// Rate limiter holding buckets in process memory.
///
/// Buckets live in a [`DashMap`]; a check holds its shard's write lock for the
/// refill-and-take, which serializes checks on the same key.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    buckets: DashMap<RateLimitKey, TokenBucket>,
    grace: Duration,
}

impl InMemoryRateLimiter {
    /// Creates an empty limiter with the default eviction grace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_EVICTION_GRACE)
    }

    /// Creates an empty limiter with a custom eviction grace.
    #[must_use]
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            grace,
        }
    }

    /// Synchronous check against the current instant.
    pub fn check_now(&self, key: &RateLimitKey, spec: BucketSpec) -> Decision {
        self.check_at(key, spec, Instant::now())
    }

    /// Synchronous check at a given instant.
    pub fn check_at(&self, key: &RateLimitKey, spec: BucketSpec, now: Instant) -> Decision {
        let mut bucket = self.buckets.entry(key.clone()).or_insert_with(|| {
            tracing::trace!(key = %key, "creating rate limit bucket");
            TokenBucket::new(spec, now)
        });
        if bucket.spec() != spec {
            bucket.reconfigure(spec, now);
        }
        bucket.try_take(now)
    }

    /// Number of live buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no buckets are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evicts buckets idle longer than their refill cycle plus grace.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evicts relative to a given instant.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            let keep = bucket.idle_for(now) <= bucket.refill_cycle().saturating_add(self.grace);
            if !keep {
                tracing::trace!(key = %key, "evicting idle rate limit bucket");
            }
            keep
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Spawns a task that sweeps every `interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, live = limiter.len(), "rate limit sweep");
                }
            }
        })
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &RateLimitKey, spec: BucketSpec) -> Result<Decision, LimiterError> {
        Ok(self.check_now(key, spec))
    }
}
