//! Token bucket rate limiter.
//!
//! Bounds the *rate* of accepted operations independently of how many run at
//! once. The bucket holds up to `capacity` tokens and refills continuously at
//! `refill_amount / refill_interval`. A fixed-window counter would admit twice
//! the budget around a window boundary; the bucket never admits more than
//! `capacity` in a burst.
//!
//! Refill and consumption happen in one critical section of a
//! `parking_lot::Mutex`; nothing awaits while the lock is held.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// What to do when a caller finds the bucket empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExhaustedPolicy {
    /// Fail immediately with `RateLimited`
    #[default]
    Reject,
    /// Suspend up to the given duration for a token, then fail with `Timeout`
    Wait(Duration),
}

/// Configuration for the token bucket
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterConfig {
    /// Maximum burst size (bucket capacity)
    pub capacity: f64,

    /// Tokens added per `refill_interval`
    pub refill_amount: f64,

    /// Interval over which `refill_amount` tokens are added
    pub refill_interval: Duration,

    /// Behaviour when the bucket is empty
    pub policy: ExhaustedPolicy,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_window(100, Duration::from_secs(60))
    }
}

impl RateLimiterConfig {
    /// `capacity` burst, refilling `rate` tokens every second
    pub fn per_second(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            refill_amount: rate,
            refill_interval: Duration::from_secs(1),
            policy: ExhaustedPolicy::Reject,
        }
    }

    /// At most `max_requests` per `window` on average, with bursts of `max_requests`
    pub fn per_window(max_requests: u32, window: Duration) -> Self {
        Self {
            capacity: max_requests as f64,
            refill_amount: max_requests as f64,
            refill_interval: window,
            policy: ExhaustedPolicy::Reject,
        }
    }

    /// Use the given exhausted-bucket policy
    pub fn with_policy(mut self, policy: ExhaustedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Refill rate in tokens per second
    pub fn rate_per_sec(&self) -> f64 {
        self.refill_amount / self.refill_interval.as_secs_f64()
    }

    /// Capacity and rate must be strictly positive and finite
    pub fn validate(&self) -> Result<()> {
        if !(self.capacity.is_finite() && self.capacity > 0.0) {
            return Err(PipelineError::config(format!(
                "rate limiter capacity must be positive, got {}",
                self.capacity
            )));
        }
        if !(self.refill_amount.is_finite() && self.refill_amount > 0.0) {
            return Err(PipelineError::config(format!(
                "rate limiter refill amount must be positive, got {}",
                self.refill_amount
            )));
        }
        if self.refill_interval.is_zero() {
            return Err(PipelineError::config("rate limiter refill interval must be non-zero"));
        }
        if self.policy == ExhaustedPolicy::Wait(Duration::ZERO) {
            return Err(PipelineError::config("rate limiter wait budget must be non-zero"));
        }
        Ok(())
    }
}

/// Stand-in deadline for timeouts too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, rate: f64) -> Self {
        Self { capacity, rate, tokens: capacity, last_refill: Instant::now() }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token is available
    fn time_to_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((1.0 - self.tokens) / self.rate).unwrap_or(Duration::MAX)
        }
    }
}

/// Token bucket admission control
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    policy: Mutex<ExhaustedPolicy>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter; the bucket starts full
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bucket: Mutex::new(TokenBucket::new(config.capacity, config.rate_per_sec())),
            policy: Mutex::new(config.policy),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Shorthand for a per-second limiter with the reject policy
    pub fn per_second(capacity: f64, rate: f64) -> Result<Self> {
        Self::new(RateLimiterConfig::per_second(capacity, rate))
    }

    /// Refill, then take one token if a whole one is available
    pub fn try_acquire(&self) -> bool {
        let acquired = self.bucket.lock().try_acquire(Instant::now());
        if acquired {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    /// `try_acquire` as a `Result`
    pub fn check(&self) -> Result<()> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(PipelineError::RateLimited)
        }
    }

    /// Wait up to `timeout` for a token. Returns false when the time runs out.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let deadline = start.checked_add(timeout).unwrap_or_else(|| start + FAR_FUTURE);
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                if bucket.try_acquire(now) {
                    self.admitted.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                bucket.time_to_next_token()
            };

            let now = Instant::now();
            if now >= deadline {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            // Sleep at least 1ms so float rounding can't spin the loop
            let wake = now
                .checked_add(wait.max(Duration::from_millis(1)))
                .map_or(deadline, |at| at.min(deadline));
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Apply the configured exhausted-bucket policy
    pub async fn admit(&self) -> Result<()> {
        let policy = *self.policy.lock();
        match policy {
            ExhaustedPolicy::Reject => self.check(),
            ExhaustedPolicy::Wait(budget) => {
                if self.acquire(budget).await {
                    Ok(())
                } else {
                    debug!(
                        budget_ms = budget.as_millis() as u64,
                        "Rate limiter wait budget exhausted"
                    );
                    Err(PipelineError::Timeout { elapsed: budget })
                }
            }
        }
    }

    /// Swap capacity, rate and policy; current tokens are clamped to the new capacity
    pub fn reconfigure(&self, config: RateLimiterConfig) -> Result<()> {
        config.validate()?;
        {
            let mut bucket = self.bucket.lock();
            bucket.refill(Instant::now());
            bucket.capacity = config.capacity;
            bucket.rate = config.rate_per_sec();
            bucket.tokens = bucket.tokens.min(config.capacity);
        }
        *self.policy.lock() = config.policy;
        debug!(
            capacity = config.capacity,
            rate = config.rate_per_sec(),
            "Rate limiter reconfigured"
        );
        Ok(())
    }

    /// Tokens currently in the bucket, after refill
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.bucket.lock().capacity
    }

    /// Get a snapshot of the limiter
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let (capacity, rate, tokens) = {
            let mut bucket = self.bucket.lock();
            bucket.refill(Instant::now());
            (bucket.capacity, bucket.rate, bucket.tokens)
        };
        RateLimiterSnapshot {
            capacity,
            rate_per_sec: rate,
            available_tokens: tokens,
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("state", &self.snapshot()).finish()
    }
}

/// Point-in-time view of a [`RateLimiter`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterSnapshot {
    pub capacity: f64,
    pub rate_per_sec: f64,
    pub available_tokens: f64,
    pub admitted: u64,
    pub rejected: u64,
}
