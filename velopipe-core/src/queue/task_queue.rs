//! Bounded task queue with concurrency control.
//!
//! Each submitted item waits for a semaphore permit, then runs as its own
//! tokio task (or blocking-pool task) that owns the permit and a running
//! guard. Whatever way the task ends, dropping those two releases the slot
//! and decrements the in-flight count.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::config::{QueueConfig, QueueFullPolicy};
use super::stats::{QueueStats, QueueStatsSnapshot, RunningGuard, WaitingGuard};
use super::work_item::{Operation, WorkItem};
use crate::error::{PipelineError, Result};
use crate::metrics::{Outcome, RequestMetrics};
use crate::rate_limit::RateLimiter;

/// Executes work items with at most `max_concurrent` running at once
pub struct BoundedTaskQueue {
    /// Configuration
    config: QueueConfig,
    /// One permit per concurrency slot; closed on shutdown
    semaphore: Arc<Semaphore>,
    /// Throughput statistics
    stats: Arc<QueueStats>,
    /// Outcome and latency sink for completed items
    metrics: Option<Arc<RequestMetrics>>,
    /// Admission control consulted before a slot is requested
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl BoundedTaskQueue {
    /// Create a new queue with the given configuration
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            stats: Arc::new(QueueStats::new()),
            metrics: None,
            rate_limiter: None,
            config,
        })
    }

    /// Create a blocking-policy queue with the given cap
    pub fn with_max_concurrent(max_concurrent: usize) -> Result<Self> {
        Self::new(QueueConfig::with_max_concurrent(max_concurrent))
    }

    /// Report every completed item to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<RequestMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consult `limiter` before admitting each item
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Submit an item and wait for its result, using the configured task timeout
    pub async fn submit<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<T> {
        self.submit_inner(item, None, self.config.task_timeout).await
    }

    /// Submit an item with a task timeout overriding the configured one
    pub async fn submit_with_timeout<T: Send + 'static>(
        &self,
        item: WorkItem<T>,
        timeout: Duration,
    ) -> Result<T> {
        self.submit_inner(item, None, Some(timeout)).await
    }

    /// Submit an item that must finish by `deadline`, waiting for admission
    /// and a slot included. On expiry it fails with `Timeout { elapsed: budget }`
    /// and is counted as timed out. The configured task timeout still applies.
    pub async fn submit_before<T: Send + 'static>(
        &self,
        item: WorkItem<T>,
        deadline: Instant,
        budget: Duration,
    ) -> Result<T> {
        let deadline = Deadline { at: deadline, budget };
        self.submit_inner(item, Some(deadline), self.config.task_timeout).await
    }

    /// Run an item in the background.
    ///
    /// The item goes through the same rate limiter, slot and accounting as
    /// `submit`, but keeps running when the returned handle is dropped.
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Send + 'static>(
        self: &Arc<Self>,
        item: WorkItem<T>,
    ) -> Result<JoinHandle<Result<T>>> {
        if self.is_closed() {
            self.stats.record_rejected();
            return Err(PipelineError::QueueClosed);
        }
        debug!(
            correlation_id = item.correlation_id().unwrap_or("-"),
            "Work item queued in background"
        );
        let queue = Arc::clone(self);
        Ok(tokio::spawn(async move { queue.submit(item).await }))
    }

    async fn submit_inner<T: Send + 'static>(
        &self,
        item: WorkItem<T>,
        deadline: Option<Deadline>,
        task_timeout: Option<Duration>,
    ) -> Result<T> {
        if self.is_closed() {
            self.stats.record_rejected();
            return Err(PipelineError::QueueClosed);
        }
        self.stats.record_submitted();

        let admitted = match deadline {
            Some(deadline) => match timeout_at(deadline.at, self.admit()).await {
                Ok(admitted) => admitted,
                Err(_) => return Err(self.expired_before_start(&item, deadline)),
            },
            None => self.admit().await,
        };
        let permit = admitted.inspect_err(|_| self.stats.record_rejected())?;
        let guard = RunningGuard::enter(self.stats.clone(), self.config.max_concurrent);
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }

        let correlation_id = item.correlation_id().map(str::to_owned);
        let queue_wait = item.submitted_at().elapsed();
        let WorkItem { operation, .. } = item;
        debug!(
            correlation_id = correlation_id.as_deref().unwrap_or("-"),
            wait_ms = queue_wait.as_millis() as u64,
            in_flight = self.stats.in_flight(),
            "Work item started"
        );

        let started = Instant::now();
        let limit = earliest(deadline, task_timeout.and_then(Deadline::after));
        let handle = spawn_operation(operation, permit, guard);
        let result = self.await_completion(handle, limit).await;
        let latency = started.elapsed();

        match &result {
            Ok(_) => self.stats.record_succeeded(),
            Err(PipelineError::Timeout { .. }) => {
                self.stats.record_timeout();
                warn!(
                    correlation_id = correlation_id.as_deref().unwrap_or("-"),
                    "Work item timed out"
                );
            }
            Err(e) => {
                self.stats.record_failed();
                warn!(
                    correlation_id = correlation_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Work item failed"
                );
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record(Outcome::of(&result), latency);
        }

        result
    }

    /// Pass the rate limiter, then take a slot
    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.admit().await?;
        }
        self.acquire_slot().await
    }

    /// Account for an item whose deadline passed while it waited to start
    fn expired_before_start<T>(&self, item: &WorkItem<T>, deadline: Deadline) -> PipelineError {
        self.stats.record_timeout();
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
            metrics.record(Outcome::Failure, item.submitted_at().elapsed());
        }
        warn!(
            correlation_id = item.correlation_id().unwrap_or("-"),
            budget_ms = deadline.budget.as_millis() as u64,
            "Work item timed out before starting"
        );
        deadline.expired()
    }

    /// Wait for (block policy) or grab (reject policy) a slot
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        match self.config.full_policy {
            QueueFullPolicy::Reject => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => {
                    Err(PipelineError::QueueFull { max: self.config.max_concurrent })
                }
                Err(TryAcquireError::Closed) => Err(PipelineError::QueueClosed),
            },
            QueueFullPolicy::Block => {
                // Fast path: no waiting-room accounting when a slot is free
                match self.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => return Ok(permit),
                    Err(TryAcquireError::Closed) => return Err(PipelineError::QueueClosed),
                    Err(TryAcquireError::NoPermits) => {}
                }

                let _waiting = WaitingGuard::try_enter(&self.stats, self.config.max_waiting)
                    .ok_or(PipelineError::QueueFull {
                        max: self.config.max_waiting.unwrap_or(usize::MAX),
                    })?;
                self.semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::QueueClosed)
            }
        }
    }

    async fn await_completion<T>(
        &self,
        mut handle: JoinHandle<std::result::Result<T, String>>,
        limit: Option<Deadline>,
    ) -> Result<T> {
        // A caller that stops waiting cancels the work
        let _cancel = AbortOnDrop(handle.abort_handle());

        let joined = match limit {
            Some(deadline) => match timeout_at(deadline.at, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Async tasks stop at their next await point; blocking ones
                    // keep their slot until they return and their result is dropped.
                    return Err(deadline.expired());
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(PipelineError::ComputationFailed(message)),
            Err(e) => Err(join_failure(e)),
        }
    }

    /// Close the queue. Waiting and future submissions fail with `QueueClosed`;
    /// running items finish. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        if !self.semaphore.is_closed() {
            self.semaphore.close();
            info!(in_flight = self.stats.in_flight(), "Task queue shut down");
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Configured concurrency cap
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Number of free slots
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Items currently running
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight()
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Attached rate limiter, if any
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Attached metrics, if any
    pub fn metrics(&self) -> Option<&Arc<RequestMetrics>> {
        self.metrics.as_ref()
    }

    /// Get a snapshot of the queue statistics
    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for BoundedTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTaskQueue")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Instant by which an item must finish, and the budget reported when it passes
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Option<Self> {
        Instant::now().checked_add(budget).map(|at| Self { at, budget })
    }

    fn expired(&self) -> PipelineError {
        PipelineError::Timeout { elapsed: self.budget }
    }
}

fn earliest(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.at < a.at { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Aborts the task when dropped; a no-op once the task has finished
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Start the operation on the runtime; the task owns the slot until it ends
fn spawn_operation<T: Send + 'static>(
    operation: Operation<T>,
    permit: OwnedSemaphorePermit,
    guard: RunningGuard,
) -> JoinHandle<std::result::Result<T, String>> {
    match operation {
        Operation::Async(future) => tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            future.await
        }),
        Operation::Blocking(f) => tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _guard = guard;
            f()
        }),
    }
}

fn join_failure(e: JoinError) -> PipelineError {
    if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        PipelineError::ComputationFailed(format!("task panicked: {}", message))
    } else {
        PipelineError::ComputationFailed("task was cancelled".to_string())
    }
}
