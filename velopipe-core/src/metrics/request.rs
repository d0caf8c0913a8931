//! Rolling request counters and latency percentiles.
//!
//! Counters are atomics that saturate at `u64::MAX`. Latencies go
//! into a fixed-size ring buffer holding the most recent `window_size`
//! samples; percentiles are computed with the nearest-rank method over that
//! window when a snapshot is taken. Recording is O(1); a snapshot copies and
//! sorts at most `window_size` values.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Default number of latency samples kept for percentile estimation
pub const DEFAULT_WINDOW_SIZE: usize = 1024;

/// Outcome of one completed unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Outcome of any `Result`
    pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Configuration for request metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsConfig {
    /// Number of most recent latency samples kept
    pub window_size: usize,

    /// Clear counters and samples once this much time has passed since the last reset
    pub reset_interval: Option<Duration>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { window_size: DEFAULT_WINDOW_SIZE, reset_interval: None }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(PipelineError::config("metrics window_size must be at least 1"));
        }
        if self.reset_interval == Some(Duration::ZERO) {
            return Err(PipelineError::config("metrics reset_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Ring buffer of the most recent latency samples, in microseconds
#[derive(Debug)]
struct LatencyWindow {
    samples: Vec<u64>,
    next: usize,
    capacity: usize,
    last_reset: Instant,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            next: 0,
            capacity,
            last_reset: Instant::now(),
        }
    }

    fn push(&mut self, micros: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(micros);
        } else {
            self.samples[self.next] = micros;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    fn clear(&mut self, now: Instant) {
        self.samples.clear();
        self.next = 0;
        self.last_reset = now;
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Thread-safe request metrics accumulator.
///
/// A unit counts as attempted when it starts and as succeeded or failed when
/// it finishes, so `attempted - succeeded - failed` units are in progress.
/// Counters and samples change together under the window lock, which keeps
/// them consistent across resets.
#[derive(Debug)]
pub struct RequestMetrics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_latency_us: AtomicU64,
    saturated: AtomicBool,
    window: Mutex<LatencyWindow>,
    reset_interval: Option<Duration>,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW_SIZE)
    }
}

impl RequestMetrics {
    /// Create metrics with the default window
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metrics keeping `window_size` samples (at least one)
    pub fn with_window(window_size: usize) -> Self {
        Self {
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            saturated: AtomicBool::new(false),
            window: Mutex::new(LatencyWindow::new(window_size.max(1))),
            reset_interval: None,
        }
    }

    /// Create metrics from a validated config
    pub fn from_config(config: &MetricsConfig) -> Result<Self> {
        config.validate()?;
        let mut metrics = Self::with_window(config.window_size);
        metrics.reset_interval = config.reset_interval;
        Ok(metrics)
    }

    /// Count one unit of work as started
    pub fn record_start(&self) {
        let mut window = self.window.lock();
        self.expire(&mut window);
        self.saturating_add(&self.attempted, 1);
    }

    /// Record the outcome and latency of a unit counted by `record_start`
    pub fn record(&self, outcome: Outcome, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);

        let mut window = self.window.lock();
        self.expire(&mut window);
        window.push(micros);
        match outcome {
            Outcome::Success => self.saturating_add(&self.succeeded, 1),
            Outcome::Failure => self.saturating_add(&self.failed, 1),
        }
        self.saturating_add(&self.total_latency_us, micros);
    }

    /// Await `future`, recording its start, outcome and latency
    pub async fn track<F, T, E>(&self, future: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        self.record_start();
        let start = Instant::now();
        let result = future.await;
        self.record(Outcome::of(&result), start.elapsed());
        result
    }

    /// Clear everything once the reset interval has passed. Caller holds the window lock.
    fn expire(&self, window: &mut LatencyWindow) {
        if let Some(interval) = self.reset_interval {
            let now = Instant::now();
            if now.saturating_duration_since(window.last_reset) >= interval {
                self.clear_counters();
                window.clear(now);
            }
        }
    }

    /// Add `n` to `counter`, pinning at `u64::MAX` instead of wrapping
    fn saturating_add(&self, counter: &AtomicU64, n: u64) {
        let result =
            counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(n));
        if result.is_err() {
            counter.store(u64::MAX, Ordering::Relaxed);
            if !self.saturated.swap(true, Ordering::Relaxed) {
                warn!("Request metrics counter saturated at u64::MAX");
            }
        }
    }

    fn clear_counters(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.saturated.store(false, Ordering::Relaxed);
    }

    /// Reset all counters and samples
    pub fn reset(&self) {
        let mut window = self.window.lock();
        self.clear_counters();
        window.clear(Instant::now());
    }

    /// Units started since the last reset
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    /// Get a snapshot of counters and window percentiles
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (mut sorted, attempted, succeeded, failed, total_latency_us, saturated) = {
            let mut window = self.window.lock();
            self.expire(&mut window);
            (
                window.samples.clone(),
                self.attempted.load(Ordering::Relaxed),
                self.succeeded.load(Ordering::Relaxed),
                self.failed.load(Ordering::Relaxed),
                self.total_latency_us.load(Ordering::Relaxed),
                self.saturated.load(Ordering::Relaxed),
            )
        };
        sorted.sort_unstable();

        let finished = succeeded.saturating_add(failed);
        MetricsSnapshot {
            attempted,
            succeeded,
            failed,
            // Units started before a reset can finish after it
            in_progress: attempted.saturating_sub(finished),
            success_rate: if attempted == 0 {
                0.0
            } else {
                (succeeded as f64 / attempted as f64).min(1.0)
            },
            mean_ms: if finished == 0 {
                0.0
            } else {
                micros_to_ms(total_latency_us) / finished as f64
            },
            p50_ms: micros_to_ms(percentile(&sorted, 0.50)),
            p95_ms: micros_to_ms(percentile(&sorted, 0.95)),
            p99_ms: micros_to_ms(percentile(&sorted, 0.99)),
            max_ms: micros_to_ms(sorted.last().copied().unwrap_or(0)),
            window_len: sorted.len(),
            saturated,
        }
    }
}

/// Read-only view of [`RequestMetrics`] at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Units started
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Units started but not yet finished
    pub in_progress: u64,
    /// Succeeded over attempted
    pub success_rate: f64,
    /// Mean latency of finished units
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Largest latency still in the window
    pub max_ms: f64,
    /// Number of samples the percentiles were computed from
    pub window_len: usize,
    /// A counter hit `u64::MAX` since the last reset
    pub saturated: bool,
}
