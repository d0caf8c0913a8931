//! Error types for the velopipe core library
//!
//! Every failure a caller can observe is a variant of [`PipelineError`].
//! Per-item failures inside batches and fan-outs are reported as values
//! (`Result<T>` entries), never raised out of the enclosing call.
//!
//! # Taxonomy
//!
//! ```text
//! PipelineError
//! ├── ComputationFailed - the supplied operation itself failed
//! ├── Timeout           - no result within the allotted time
//! ├── QueueClosed       - submission after shutdown
//! ├── QueueFull         - slot or waiting capacity exhausted (reject policy)
//! ├── InvalidConfig     - bad cap/chunk-size/rate values
//! └── RateLimited       - token bucket exhausted, waiting not requested
//! ```
//!
//! Application code (the CLI, the benchmarks) wraps these with `anyhow`.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The work item's operation returned an error or panicked
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    /// The waiter gave up after the allotted time
    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The queue has been shut down
    #[error("queue is closed")]
    QueueClosed,

    /// No slot was free and the reject policy is active, or too many callers are waiting
    #[error("queue is full (max: {max})")]
    QueueFull { max: usize },

    /// A configuration value was rejected at construction or call time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The token bucket had no whole token left
    #[error("rate limit exceeded")]
    RateLimited,
}

impl PipelineError {
    /// Create a computation failure from any displayable error
    pub fn computation(err: impl std::fmt::Display) -> Self {
        Self::ComputationFailed(err.to_string())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error was produced by a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the work was refused before it started (closed, full, rate limited)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::QueueClosed | Self::QueueFull { .. } | Self::RateLimited)
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::computation("connection reset");
        assert_eq!(err.to_string(), "computation failed: connection reset");

        let err = PipelineError::QueueFull { max: 20 };
        assert_eq!(err.to_string(), "queue is full (max: 20)");

        let err = PipelineError::config("chunk_size must be positive");
        assert_eq!(err.to_string(), "invalid configuration: chunk_size must be positive");

        let err = PipelineError::Timeout { elapsed: Duration::from_millis(250) };
        assert_eq!(err.to_string(), "timed out after 250ms");
    }

    #[test]
    fn test_error_classification() {
        assert!(PipelineError::Timeout { elapsed: Duration::ZERO }.is_timeout());
        assert!(!PipelineError::QueueClosed.is_timeout());

        assert!(PipelineError::QueueClosed.is_rejection());
        assert!(PipelineError::RateLimited.is_rejection());
        assert!(PipelineError::QueueFull { max: 1 }.is_rejection());
        assert!(!PipelineError::computation("boom").is_rejection());
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(PipelineError::computation("x"), PipelineError::ComputationFailed("x".into()));
        assert_ne!(PipelineError::QueueClosed, PipelineError::RateLimited);
    }
}
