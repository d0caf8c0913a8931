//! Throughput statistics for the bounded task queue.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Counters describing the queue's lifetime activity
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Items handed to `submit`
    submitted: AtomicU64,

    /// Items that obtained a slot and started running
    started: AtomicU64,

    /// Items whose computation returned a value
    succeeded: AtomicU64,

    /// Items whose computation failed or panicked
    failed: AtomicU64,

    /// Items whose waiter gave up on a timeout
    timed_out: AtomicU64,

    /// Submissions refused (queue full or closed)
    rejected: AtomicU64,

    /// Items currently running
    in_flight: AtomicUsize,

    /// Callers currently suspended waiting for a slot
    waiting: AtomicUsize,

    /// Highest in-flight count ever observed
    peak_in_flight: AtomicUsize,
}

impl QueueStats {
    /// Create a zeroed stats block
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Items currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Callers currently waiting for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Fraction of finished items that succeeded
    pub fn success_rate(&self) -> f64 {
        let ok = self.succeeded.load(Ordering::Relaxed);
        let finished =
            ok + self.failed.load(Ordering::Relaxed) + self.timed_out.load(Ordering::Relaxed);
        if finished == 0 {
            return 0.0;
        }
        ok as f64 / finished as f64
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            waiting: self.waiting(),
            peak_in_flight: self.peak_in_flight(),
            success_rate: self.success_rate(),
        }
    }
}

/// Point-in-time view of [`QueueStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatsSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    pub in_flight: usize,
    pub waiting: usize,
    pub peak_in_flight: usize,
    pub success_rate: f64,
}

/// Marks one item as running for as long as it lives.
///
/// Owned by the task executing the item, so the count drops on every exit
/// path: return, error, panic unwinding and abort.
pub(crate) struct RunningGuard {
    stats: Arc<QueueStats>,
}

impl RunningGuard {
    /// Enter the running state. Panics if the cap would be exceeded.
    pub(crate) fn enter(stats: Arc<QueueStats>, cap: usize) -> Self {
        stats.started.fetch_add(1, Ordering::Relaxed);
        let running = stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            running <= cap,
            "concurrency invariant violated: {} items running with a cap of {}",
            running,
            cap
        );
        stats.peak_in_flight.fetch_max(running, Ordering::AcqRel);
        Self { stats }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let previous = self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            // Never continue with a wrapped counter
            panic!("concurrency invariant violated: in-flight counter went negative");
        }
    }
}

/// Marks one caller as waiting for a slot for as long as it lives
pub(crate) struct WaitingGuard<'a> {
    stats: &'a QueueStats,
}

impl<'a> WaitingGuard<'a> {
    /// Register a waiter unless `limit` waiters are already suspended
    pub(crate) fn try_enter(stats: &'a QueueStats, limit: Option<usize>) -> Option<Self> {
        let admitted = stats
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match limit {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .is_ok();
        admitted.then(|| Self { stats })
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.stats.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_guard_tracks_in_flight() {
        let stats = Arc::new(QueueStats::new());

        let a = RunningGuard::enter(stats.clone(), 2);
        let b = RunningGuard::enter(stats.clone(), 2);
        assert_eq!(stats.in_flight(), 2);
        assert_eq!(stats.peak_in_flight(), 2);

        drop(a);
        assert_eq!(stats.in_flight(), 1);
        drop(b);
        assert_eq!(stats.in_flight(), 0);

        // Peak survives the drain
        assert_eq!(stats.peak_in_flight(), 2);
        assert_eq!(stats.snapshot().started, 2);
    }

    #[test]
    #[should_panic(expected = "concurrency invariant violated")]
    fn test_running_guard_panics_over_cap() {
        let stats = Arc::new(QueueStats::new());
        let _a = RunningGuard::enter(stats.clone(), 1);
        let _b = RunningGuard::enter(stats, 1);
    }

    #[test]
    fn test_waiting_guard_limit() {
        let stats = QueueStats::new();

        let first = WaitingGuard::try_enter(&stats, Some(1));
        assert!(first.is_some());
        assert!(WaitingGuard::try_enter(&stats, Some(1)).is_none());
        assert_eq!(stats.waiting(), 1);

        // A refused waiter leaves the count alone
        assert!(WaitingGuard::try_enter(&stats, Some(1)).is_none());
        assert_eq!(stats.waiting(), 1);

        drop(first);
        assert_eq!(stats.waiting(), 0);
        assert!(WaitingGuard::try_enter(&stats, None).is_some());
    }

    #[test]
    fn test_success_rate() {
        let stats = QueueStats::new();
        assert_eq!(stats.success_rate(), 0.0);

        for _ in 0..3 {
            stats.record_succeeded();
        }
        stats.record_failed();
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.succeeded, 3);
        assert_eq!(snapshot.failed, 1);
    }
}
