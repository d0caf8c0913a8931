//! Bounded task queue for velopipe.
//!
//! Work items wait for one of `max_concurrent` slots, then run on the tokio
//! runtime. The queue never has more items running than its cap.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      submit(item)                        │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   RateLimiter   │ ← Optional admission budget
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Semaphore     │ ← Concurrency cap
//!                    │ (max_concurrent)│   Block or Reject when full
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │  tokio task     │ ← Owns permit + running guard
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │ RequestMetrics  │ ← Outcome + latency
//!                    └─────────────────┘
//! ```
//!
//! # Features
//!
//! - **Concurrency Control**: Hard cap on running items, checked on every change
//! - **Backpressure**: Block callers, bound the waiting room, or reject outright
//! - **Timeout Handling**: Per-queue or per-call task timeouts
//! - **Statistics**: Submitted, started, finished, rejected, in-flight, peak

mod config;
mod stats;
mod task_queue;
mod work_item;

pub use config::{QueueConfig, QueueFullPolicy};
pub use stats::{QueueStats, QueueStatsSnapshot};
pub use task_queue::BoundedTaskQueue;
pub use work_item::WorkItem;
