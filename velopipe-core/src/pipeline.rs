//! Pipeline facade wiring one queue, an optional rate limiter and metrics.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::batch::BatchProcessor;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fetcher::{FetchOperation, FetchResult, ParallelFetcher};
use crate::metrics::{MetricsSnapshot, RequestMetrics};
use crate::queue::{BoundedTaskQueue, QueueStatsSnapshot, WorkItem};
use crate::rate_limit::{RateLimiter, RateLimiterSnapshot};

/// Everything observable about a pipeline at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub max_concurrent: usize,
    pub queue: QueueStatsSnapshot,
    pub metrics: MetricsSnapshot,
    pub rate_limiter: Option<RateLimiterSnapshot>,
}

/// Shared processing pipeline.
///
/// Batches and fan-outs go through the same queue as single submissions, so
/// the concurrency cap and the rate budget apply to all of them together.
#[derive(Debug, Clone)]
pub struct Pipeline {
    queue: Arc<BoundedTaskQueue>,
    batch: BatchProcessor,
    fetcher: ParallelFetcher,
    metrics: Arc<RequestMetrics>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl Pipeline {
    /// Validate `config` and build every component
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(RequestMetrics::from_config(&config.metrics)?);
        let rate_limiter =
            config.rate_limit.clone().map(RateLimiter::new).transpose()?.map(Arc::new);

        let mut queue = BoundedTaskQueue::new(config.queue.clone())?.with_metrics(metrics.clone());
        if let Some(limiter) = &rate_limiter {
            queue = queue.with_rate_limiter(limiter.clone());
        }
        let queue = Arc::new(queue);

        info!(
            max_concurrent = config.queue.max_concurrent,
            policy = ?config.queue.full_policy,
            chunk_size = config.batch.chunk_size,
            rate_limited = rate_limiter.is_some(),
            "Pipeline created"
        );

        Ok(Self {
            batch: BatchProcessor::new(queue.clone(), config.batch)?,
            fetcher: ParallelFetcher::new(queue.clone(), config.fetcher)?,
            queue,
            metrics,
            rate_limiter,
        })
    }

    /// Run one work item
    pub async fn submit<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<T> {
        self.queue.submit(item).await
    }

    /// Run one work item in the background; see [`BoundedTaskQueue::spawn`]
    pub fn spawn<T: Send + 'static>(&self, item: WorkItem<T>) -> Result<JoinHandle<Result<T>>> {
        self.queue.spawn(item)
    }

    /// Run a batch in chunks of the configured size
    pub async fn process<I, T, F>(&self, items: Vec<I>, op: F) -> Result<Vec<Result<T>>>
    where
        T: Send + 'static,
        F: Fn(I) -> WorkItem<T>,
    {
        self.batch.process(items, op).await
    }

    /// Fan out to independent sources
    pub async fn fetch_all<T: Send + 'static>(
        &self,
        operations: Vec<FetchOperation<T>>,
    ) -> Vec<FetchResult<T>> {
        self.fetcher.fetch_all(operations).await
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            max_concurrent: self.queue.max_concurrent(),
            queue: self.queue.stats(),
            metrics: self.metrics.snapshot(),
            rate_limiter: self.rate_limiter.as_ref().map(|l| l.snapshot()),
        }
    }

    /// Close the queue; idempotent
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    pub fn queue(&self) -> &Arc<BoundedTaskQueue> {
        &self.queue
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    pub fn fetcher(&self) -> &ParallelFetcher {
        &self.fetcher
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::rate_limit::RateLimiterConfig;

    #[tokio::test]
    async fn test_components_share_one_queue() {
        let pipeline = Pipeline::from_config(PipelineConfig::default()).unwrap();

        pipeline.submit(WorkItem::new(async { Ok::<_, String>(1) })).await.unwrap();
        pipeline
            .process(vec![1u32, 2, 3], |x| WorkItem::new(async move { Ok::<_, String>(x) }))
            .await
            .unwrap();
        pipeline
            .fetch_all(vec![FetchOperation::from_future("db", async { Ok::<_, String>(0u32) })])
            .await;

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.queue.succeeded, 5);
        assert_eq!(snapshot.metrics.attempted, 5);
        assert!(snapshot.rate_limiter.is_none());
        assert_eq!(snapshot.max_concurrent, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_submission_shows_in_snapshot() {
        let pipeline = Pipeline::from_config(PipelineConfig::default()).unwrap();

        let handle = pipeline
            .spawn(WorkItem::new(async {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                Ok::<_, String>("queued work")
            }))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let running = pipeline.snapshot();
        assert_eq!(running.queue.in_flight, 1);
        assert_eq!(running.metrics.in_progress, 1);

        assert_eq!(handle.await.unwrap(), Ok("queued work"));
        let done = pipeline.snapshot();
        assert_eq!(done.metrics.succeeded, 1);
        assert_eq!(done.metrics.in_progress, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let mut config = PipelineConfig::default();
        config.metrics.window_size = 0;
        assert!(matches!(Pipeline::from_config(config), Err(PipelineError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_applies_to_batches() {
        let config = PipelineConfig {
            rate_limit: Some(RateLimiterConfig::per_second(3.0, 1.0)),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::from_config(config).unwrap();

        let results = pipeline
            .process((0..5u32).collect(), |x| WorkItem::new(async move { Ok::<_, String>(x) }))
            .await
            .unwrap();

        let limited = results.iter().filter(|r| **r == Err(PipelineError::RateLimited)).count();
        assert_eq!(limited, 2);
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.rate_limiter.map(|l| l.rejected), Some(2));
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let pipeline = Pipeline::from_config(PipelineConfig::default()).unwrap();
        pipeline.submit(WorkItem::new(async { Ok::<_, String>(()) })).await.unwrap();

        let json = serde_json::to_value(pipeline.snapshot()).unwrap();
        assert_eq!(json["max_concurrent"], 20);
        assert_eq!(json["queue"]["succeeded"], 1);
        assert_eq!(json["metrics"]["attempted"], 1);
        assert!(json["rate_limiter"].is_null());
    }

    #[tokio::test]
    async fn test_shutdown_through_facade() {
        let pipeline = Pipeline::from_config(PipelineConfig::default()).unwrap();
        pipeline.shutdown();
        pipeline.shutdown();

        let result = pipeline.submit(WorkItem::new(async { Ok::<_, String>(()) })).await;
        assert_eq!(result, Err(PipelineError::QueueClosed));
    }
}
