use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{SupportError, SupportResult};

/// Absorbs float drift so a bucket refilled for exactly `1 / rate` ms holds
/// a whole token.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_ms: f64,
}

impl BucketConfig {
    /// `capacity` tokens, refilled evenly over `window`.
    pub fn per_window(capacity: f64, window: Duration) -> Self {
        Self {
            capacity,
            refill_per_ms: capacity / window.as_millis().max(1) as f64,
        }
    }

    /// Conversation creation: burst of 10, 10 per minute.
    pub fn conversation_create() -> Self {
        Self::per_window(10.0, Duration::from_secs(60))
    }

    /// AI enrichment: 5 per hour per subject.
    pub fn ai_enrichment() -> Self {
        Self::per_window(5.0, Duration::from_secs(3600))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed { remaining: f64 },
    Denied { remaining: f64, retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token buckets held in process memory. Best effort: state is lost
/// on restart and not shared between processes.
pub struct RateLimiter {
    config: BucketConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: BucketConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> BucketConfig {
        self.config
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn consume(&self, key: &str, n: f64) -> Decision {
        self.consume_at(key, n, Instant::now())
    }

    /// Refill for the time elapsed since the last refill, then take `n`
    /// tokens if they are there. A denial leaves the refilled count alone.
    /// More than `capacity` tokens can never be granted; that denial carries
    /// `Duration::MAX` as its wait.
    pub fn consume_at(&self, key: &str, n: f64, now: Instant) -> Decision {
        let BucketConfig {
            capacity,
            refill_per_ms,
        } = self.config;

        let mut buckets = self.buckets();
        if n > capacity + EPSILON {
            let remaining = buckets.get(key).map_or(capacity, |bucket| bucket.tokens);
            return Decision::Denied {
                remaining,
                retry_after: Duration::MAX,
            };
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_secs_f64() * 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_ms * refill_per_ms).min(capacity);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens + EPSILON >= n {
            bucket.tokens = (bucket.tokens - n).max(0.0);
            Decision::Allowed {
                remaining: bucket.tokens,
            }
        } else {
            let missing = n - bucket.tokens;
            let wait_ms = if refill_per_ms > 0.0 {
                (missing / refill_per_ms).ceil()
            } else {
                f64::from(u32::MAX)
            };
            debug!(key, remaining = bucket.tokens, "rate limit denied");
            Decision::Denied {
                remaining: bucket.tokens,
                retry_after: Duration::from_millis(wait_ms as u64),
            }
        }
    }

    /// `consume` as a `Result`, for call sites that just propagate. Asking
    /// for more than a full bucket is invalid input rather than a rate limit.
    pub fn check(&self, key: &str, n: f64) -> SupportResult<f64> {
        if !(n > 0.0 && n <= self.config.capacity) {
            return Err(SupportError::invalid_input(format!(
                "cannot take {} tokens from a bucket of {}",
                n, self.config.capacity
            )));
        }
        match self.consume(key, n) {
            Decision::Allowed { remaining } => Ok(remaining),
            Decision::Denied {
                remaining,
                retry_after,
            } => Err(SupportError::RateLimited {
                remaining,
                retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Forget buckets that have been idle for `max_idle` and would be full by
    /// now. Returns how many were dropped.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        self.prune_idle_at(max_idle, Instant::now())
    }

    pub fn prune_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let BucketConfig {
            capacity,
            refill_per_ms,
        } = self.config;

        let mut buckets = self.buckets();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill);
            let refilled = bucket.tokens + idle.as_secs_f64() * 1000.0 * refill_per_ms;
            idle < max_idle || refilled + EPSILON < capacity
        });
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets().len()
    }
}
