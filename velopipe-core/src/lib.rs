//! velopipe core library
//!
//! Admission-controlled, bounded-concurrency request processing.
//!
//! - [`BoundedTaskQueue`]: runs work items under a hard concurrency cap
//! - [`BatchProcessor`]: drives large inputs through the queue in chunks
//! - [`RateLimiter`]: token bucket consulted before a slot is requested
//! - [`ParallelFetcher`]: fan-out with per-source failure isolation
//! - [`RequestMetrics`]: outcome counters and latency percentiles
//!
//! [`Pipeline`] wires all of them around one shared queue.
//!
//! # Example
//! ```no_run
//! use velopipe_core::{Pipeline, PipelineConfig, WorkItem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::from_config(PipelineConfig::from_env())?;
//!     let answer = pipeline.submit(WorkItem::new(async { Ok::<_, String>(42) })).await?;
//!     println!("{} (p99 {:.1} ms)", answer, pipeline.snapshot().metrics.p99_ms);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;


pub use batch::{BatchConfig, BatchProcessor};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use fetcher::{FetchOperation, FetchResult, FetchSummary, FetcherConfig, ParallelFetcher};
pub use metrics::{MetricsConfig, MetricsSnapshot, Outcome, PipelineExporter, RequestMetrics};
pub use pipeline::{Pipeline, PipelineSnapshot};
pub use queue::{BoundedTaskQueue, QueueConfig, QueueFullPolicy, QueueStatsSnapshot, WorkItem};
pub use rate_limit::{ExhaustedPolicy, RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
