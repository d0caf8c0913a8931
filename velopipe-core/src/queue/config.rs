//! Configuration for the bounded task queue.

use std::time::Duration;

use serde::Serialize;

use crate::error::{PipelineError, Result};

/// What `submit` does when every slot is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Suspend the caller until a slot frees up
    #[default]
    Block,
    /// Fail immediately with `QueueFull`
    Reject,
}

impl std::str::FromStr for QueueFullPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" | "wait" => Ok(Self::Block),
            "reject" | "fail" => Ok(Self::Reject),
            other => Err(PipelineError::config(format!("unknown queue policy '{}'", other))),
        }
    }
}

/// Configuration for the bounded task queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueConfig {
    /// Maximum number of work items running at the same time
    pub max_concurrent: usize,

    /// Behaviour when no slot is free
    pub full_policy: QueueFullPolicy,

    /// Maximum number of callers suspended waiting for a slot (block policy only).
    /// `None` means unbounded.
    pub max_waiting: Option<usize>,

    /// Per-task timeout, measured from the moment the task starts running
    pub task_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            full_policy: QueueFullPolicy::Block,
            max_waiting: None,
            task_timeout: None,
        }
    }
}

impl QueueConfig {
    /// Create config with the given concurrency cap and defaults elsewhere
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self { max_concurrent, ..Self::default() }
    }

    /// Create config optimized for low latency: few slots, fail fast
    pub fn low_latency() -> Self {
        Self {
            max_concurrent: 4,
            full_policy: QueueFullPolicy::Reject,
            max_waiting: Some(0),
            task_timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Create config optimized for high throughput: many slots, deep waiting room
    pub fn high_throughput() -> Self {
        Self {
            max_concurrent: 64,
            full_policy: QueueFullPolicy::Block,
            max_waiting: Some(10_000),
            task_timeout: Some(Duration::from_secs(300)),
        }
    }

    /// Reject caps and timeouts that would make the queue unusable
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(PipelineError::config("max_concurrent must be at least 1"));
        }
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(PipelineError::config("task_timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 20);
        assert_eq!(config.full_policy, QueueFullPolicy::Block);
        assert!(config.max_waiting.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(QueueConfig::low_latency().validate().is_ok());
        assert!(QueueConfig::high_throughput().validate().is_ok());
        assert_eq!(QueueConfig::high_throughput().max_concurrent, 64);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let config = QueueConfig::with_max_concurrent(0);
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = QueueConfig { task_timeout: Some(Duration::ZERO), ..QueueConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("block".parse::<QueueFullPolicy>().unwrap(), QueueFullPolicy::Block);
        assert_eq!(" Reject ".parse::<QueueFullPolicy>().unwrap(), QueueFullPolicy::Reject);
        assert!("drop".parse::<QueueFullPolicy>().is_err());
    }
}
