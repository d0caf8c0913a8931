//! Metrics module for velopipe
//!
//! Request outcome and latency tracking, plus a Prometheus exporter for
//! pipeline snapshots.

pub mod prometheus;
mod request;

// Re-export commonly used items
pub use self::prometheus::PipelineExporter;
pub use request::{MetricsConfig, MetricsSnapshot, Outcome, RequestMetrics, DEFAULT_WINDOW_SIZE};
