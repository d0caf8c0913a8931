//! Chunked batch processing on top of the bounded task queue.
//!
//! A large input is split into fixed-size chunks processed one after another.
//! Inside a chunk every item is submitted to the queue at once, so the queue's
//! cap decides how many actually run. Results come back in input order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::queue::{BoundedTaskQueue, WorkItem};

/// Configuration for batch processing
#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    /// Number of items per chunk
    pub chunk_size: usize,

    /// Deadline for each chunk, measured from the moment the chunk is submitted.
    /// Items not finished by then, including ones still waiting for a slot,
    /// fail with `Timeout` and are counted as timed out by the queue.
    pub chunk_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_timeout: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be at least 1"));
        }
        if self.chunk_timeout == Some(Duration::ZERO) {
            return Err(PipelineError::config("chunk_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Sizes of the chunks `len` items are split into
///
/// ```
/// use velopipe_core::batch::chunk_plan;
///
/// assert_eq!(chunk_plan(250, 100).unwrap(), vec![100, 100, 50]);
/// assert!(chunk_plan(0, 100).unwrap().is_empty());
/// ```
pub fn chunk_plan(len: usize, chunk_size: usize) -> Result<Vec<usize>> {
    if chunk_size == 0 {
        return Err(PipelineError::config("chunk_size must be at least 1"));
    }
    let full = len / chunk_size;
    let mut plan = vec![chunk_size; full];
    if len % chunk_size != 0 {
        plan.push(len % chunk_size);
    }
    Ok(plan)
}

/// Drives large inputs through a shared [`BoundedTaskQueue`] in chunks
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    queue: Arc<BoundedTaskQueue>,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(queue: Arc<BoundedTaskQueue>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { queue, config })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process `items` with the configured chunk size
    pub async fn process<I, T, F>(&self, items: Vec<I>, op: F) -> Result<Vec<Result<T>>>
    where
        T: Send + 'static,
        F: Fn(I) -> WorkItem<T>,
    {
        self.process_chunked(items, self.config.chunk_size, op).await
    }

    /// Process `items` in chunks of `chunk_size`.
    ///
    /// `op` turns each input into a work item. The outer `Result` only fails for
    /// an invalid `chunk_size`; per-item failures, including chunk timeouts,
    /// sit at the item's position in the returned vector.
    pub async fn process_chunked<I, T, F>(
        &self,
        items: Vec<I>,
        chunk_size: usize,
        op: F,
    ) -> Result<Vec<Result<T>>>
    where
        T: Send + 'static,
        F: Fn(I) -> WorkItem<T>,
    {
        let plan = chunk_plan(items.len(), chunk_size)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let batch_start = Instant::now();
        info!(items = total, chunks = plan.len(), chunk_size, "Batch processing started");

        let mut results = Vec::with_capacity(total);
        let mut remaining = items.into_iter();
        for (index, size) in plan.iter().copied().enumerate() {
            let chunk: Vec<WorkItem<T>> = remaining.by_ref().take(size).map(&op).collect();

            let chunk_start = Instant::now();
            let chunk_results = self.run_chunk(chunk).await;
            let failed = chunk_results.iter().filter(|r| r.is_err()).count();
            debug!(
                chunk = index,
                size,
                failed,
                elapsed_ms = chunk_start.elapsed().as_millis() as u64,
                "Chunk completed"
            );
            results.extend(chunk_results);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(items = total, failed, "Batch finished with failures");
        }
        info!(
            items = total,
            succeeded = total - failed,
            elapsed_ms = batch_start.elapsed().as_millis() as u64,
            "Batch processing finished"
        );

        Ok(results)
    }

    async fn run_chunk<T: Send + 'static>(&self, chunk: Vec<WorkItem<T>>) -> Vec<Result<T>> {
        let queue = &self.queue;
        let deadline = self
            .config
            .chunk_timeout
            .and_then(|budget| Instant::now().checked_add(budget).map(|at| (at, budget)));

        let submissions = chunk.into_iter().map(|item| async move {
            match deadline {
                Some((at, budget)) => queue.submit_before(item, at, budget).await,
                None => queue.submit(item).await,
            }
        });

        join_all(submissions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestMetrics;

    fn doubler(x: u64) -> WorkItem<u64> {
        WorkItem::new(async move { Ok::<_, String>(x * 2) })
    }

    /// Distinct delays in a scrambled order: `step` must be coprime with `len`
    fn scrambled_delays(len: u64, step: u64, offset: u64) -> Vec<u64> {
        (0..len).map(|i| (i * step + offset) % len).collect()
    }

    fn processor(cap: usize, config: BatchConfig) -> BatchProcessor {
        let queue = Arc::new(BoundedTaskQueue::with_max_concurrent(cap).unwrap());
        BatchProcessor::new(queue, config).unwrap()
    }

    #[test]
    fn test_chunk_plan() {
        assert_eq!(chunk_plan(250, 100).unwrap(), vec![100, 100, 50]);
        assert_eq!(chunk_plan(200, 100).unwrap(), vec![100, 100]);
        assert_eq!(chunk_plan(3, 10).unwrap(), vec![3]);
        assert!(chunk_plan(0, 10).unwrap().is_empty());
        assert!(matches!(chunk_plan(5, 0), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_batch_config() {
        let config = BatchConfig { chunk_size: 0, ..BatchConfig::default() };
        assert!(config.validate().is_err());

        let config = BatchConfig { chunk_timeout: Some(Duration::ZERO), ..BatchConfig::default() };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let batch = processor(4, BatchConfig::default());
        let results = batch.process(Vec::<u64>::new(), doubler).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_at_call_time() {
        let batch = processor(4, BatchConfig::default());
        let result = batch.process_chunked(vec![1u64, 2], 0, doubler).await;
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let batch = processor(8, BatchConfig::default());
        let items: Vec<u64> = (0..25).collect();

        // Later items finish first
        let results = batch
            .process_chunked(items, 10, |x| {
                WorkItem::new(async move {
                    tokio::time::sleep(Duration::from_millis(25 - x)).await;
                    Ok::<_, String>(x)
                })
            })
            .await
            .unwrap();

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..25).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_holds_for_scrambled_completions() {
        let batch = processor(6, BatchConfig::default());

        for (step, offset) in [(7, 0), (11, 3), (13, 17), (19, 5), (1, 12)] {
            let delays = scrambled_delays(24, step, offset);
            let results = batch
                .process_chunked(delays.clone(), 10, |ms| {
                    WorkItem::new(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok::<_, String>(ms)
                    })
                })
                .await
                .unwrap();

            let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
            assert_eq!(values, delays, "step {} offset {}", step, offset);
        }
    }

    #[tokio::test]
    async fn test_failures_stay_in_place() {
        let batch = processor(4, BatchConfig::default());
        let results = batch
            .process(vec![1u64, 2, 3, 4], |x| {
                WorkItem::new(async move {
                    if x % 2 == 0 {
                        Err(format!("even input {}", x))
                    } else {
                        Ok(x)
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(results[0], Ok(1));
        assert_eq!(results[1], Err(PipelineError::ComputationFailed("even input 2".into())));
        assert_eq!(results[2], Ok(3));
        assert!(results[3].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout_keeps_finished_items() {
        let config =
            BatchConfig { chunk_size: 3, chunk_timeout: Some(Duration::from_millis(100)) };
        let batch = processor(3, config);

        let results = batch
            .process(vec![10u64, 500, 20, 30], |ms| {
                WorkItem::new(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(ms)
                })
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], Ok(10));
        assert_eq!(results[1], Err(PipelineError::Timeout { elapsed: Duration::from_millis(100) }));
        assert_eq!(results[2], Ok(20));
        // The next chunk still runs
        assert_eq!(results[3], Ok(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout_is_counted() {
        let metrics = Arc::new(RequestMetrics::new());
        let queue = Arc::new(
            BoundedTaskQueue::with_max_concurrent(3).unwrap().with_metrics(metrics.clone()),
        );
        let config =
            BatchConfig { chunk_size: 3, chunk_timeout: Some(Duration::from_millis(100)) };
        let batch = BatchProcessor::new(queue.clone(), config).unwrap();

        let results = batch
            .process(vec![10u64, 500, 20], |ms| {
                WorkItem::new(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(ms)
                })
            })
            .await
            .unwrap();
        assert!(results[1].as_ref().is_err_and(PipelineError::is_timeout));

        let stats = queue.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.failed, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempted, 3);
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.in_progress, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout_covers_slot_wait() {
        let queue = Arc::new(BoundedTaskQueue::with_max_concurrent(1).unwrap());
        let config =
            BatchConfig { chunk_size: 2, chunk_timeout: Some(Duration::from_millis(100)) };
        let batch = BatchProcessor::new(queue.clone(), config).unwrap();

        let results = batch
            .process(vec![500u64, 10], |ms| {
                WorkItem::new(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(ms)
                })
            })
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.as_ref().is_err_and(PipelineError::is_timeout)));
        let stats = queue.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.timed_out, 2);
        assert_eq!(stats.waiting, 0);
    }
}
