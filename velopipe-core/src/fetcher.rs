//! Fan-out to independent data sources with partial-failure tolerance.
//!
//! Every operation goes through the shared queue, so the fan-out width is
//! bounded by the queue's cap. Each result lands in the slot of its input
//! position; one source failing never cancels the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::queue::{BoundedTaskQueue, WorkItem};

/// Configuration for parallel fetches
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetcherConfig {
    /// Timeout applied to each fetch once it is running
    pub fetch_timeout: Option<Duration>,
}

impl FetcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout == Some(Duration::ZERO) {
            return Err(PipelineError::config("fetch_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// One named fetch
#[derive(Debug)]
pub struct FetchOperation<T> {
    name: String,
    item: WorkItem<T>,
}

impl<T: Send + 'static> FetchOperation<T> {
    pub fn new(name: impl Into<String>, item: WorkItem<T>) -> Self {
        let name = name.into();
        Self { item: item.with_correlation_id(name.clone()), name }
    }

    /// Named fetch from a future
    pub fn from_future<F, E>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self::new(name, WorkItem::new(future))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result of one fetch, tagged with the operation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult<T> {
    /// Position of the operation in the input
    pub index: usize,
    /// Name of the operation
    pub source: String,
    pub outcome: Result<T>,
}

impl<T> FetchResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

/// Success and failure counts of a fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Names of the sources that failed, in input order
    pub failed_sources: Vec<String>,
}

impl FetchSummary {
    pub fn of<T>(results: &[FetchResult<T>]) -> Self {
        let failed_sources: Vec<String> =
            results.iter().filter(|r| !r.is_ok()).map(|r| r.source.clone()).collect();
        Self {
            total: results.len(),
            succeeded: results.len() - failed_sources.len(),
            failed: failed_sources.len(),
            failed_sources,
        }
    }

    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

/// Runs independent operations concurrently through a shared queue
#[derive(Debug, Clone)]
pub struct ParallelFetcher {
    queue: Arc<BoundedTaskQueue>,
    config: FetcherConfig,
}

impl ParallelFetcher {
    pub fn new(queue: Arc<BoundedTaskQueue>, config: FetcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { queue, config })
    }

    /// Run all operations and return one result per operation, in input order
    pub async fn fetch_all<T: Send + 'static>(
        &self,
        operations: Vec<FetchOperation<T>>,
    ) -> Vec<FetchResult<T>> {
        let total = operations.len();
        if total == 0 {
            return Vec::new();
        }

        let start = Instant::now();
        let mut slots: Vec<Option<FetchResult<T>>> = (0..total).map(|_| None).collect();

        let mut pending: FuturesUnordered<_> = operations
            .into_iter()
            .enumerate()
            .map(|(index, op)| self.fetch_one(index, op))
            .collect();

        while let Some(result) = pending.next().await {
            if let Err(e) = &result.outcome {
                warn!(source = %result.source, index = result.index, error = %e, "Fetch failed");
            }
            let index = result.index;
            slots[index] = Some(result);
        }

        let results: Vec<FetchResult<T>> = slots.into_iter().flatten().collect();
        debug_assert_eq!(results.len(), total);

        let summary = FetchSummary::of(&results);
        debug!(
            total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Parallel fetch completed"
        );
        results
    }

    async fn fetch_one<T: Send + 'static>(
        &self,
        index: usize,
        op: FetchOperation<T>,
    ) -> FetchResult<T> {
        let FetchOperation { name, item } = op;
        let outcome = match self.config.fetch_timeout {
            Some(timeout) => self.queue.submit_with_timeout(item, timeout).await,
            None => self.queue.submit(item).await,
        };
        FetchResult { index, source: name, outcome }
    }
}
