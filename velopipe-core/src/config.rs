//! Pipeline configuration.
//!
//! Defaults, presets and `VELOPIPE_*` environment overrides for every
//! component of a [`Pipeline`](crate::Pipeline).

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::batch::BatchConfig;
use crate::error::Result;
use crate::fetcher::FetcherConfig;
use crate::metrics::MetricsConfig;
use crate::queue::{QueueConfig, QueueFullPolicy};
use crate::rate_limit::{ExhaustedPolicy, RateLimiterConfig};

/// Configuration for a whole pipeline
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    /// `None` runs without admission control
    pub rate_limit: Option<RateLimiterConfig>,
    pub fetcher: FetcherConfig,
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Create config optimized for low latency (interactive callers)
    pub fn low_latency() -> Self {
        Self {
            queue: QueueConfig::low_latency(),
            batch: BatchConfig { chunk_size: 10, chunk_timeout: Some(Duration::from_secs(10)) },
            rate_limit: None,
            fetcher: FetcherConfig { fetch_timeout: Some(Duration::from_secs(2)) },
            metrics: MetricsConfig::default(),
        }
    }

    /// Create config optimized for high throughput (bulk jobs)
    pub fn high_throughput() -> Self {
        Self {
            queue: QueueConfig::high_throughput(),
            batch: BatchConfig { chunk_size: 500, chunk_timeout: Some(Duration::from_secs(600)) },
            rate_limit: None,
            fetcher: FetcherConfig { fetch_timeout: Some(Duration::from_secs(30)) },
            metrics: MetricsConfig { window_size: 4096, reset_interval: None },
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup; unparseable values are logged and ignored
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup };
        let mut config = Self::default();

        if let Some(n) = vars.parse("VELOPIPE_MAX_CONCURRENT") {
            config.queue.max_concurrent = n;
        }
        if let Some(policy) = vars.parse::<QueueFullPolicy>("VELOPIPE_QUEUE_POLICY") {
            config.queue.full_policy = policy;
        }
        if let Some(n) = vars.parse::<usize>("VELOPIPE_MAX_WAITING") {
            config.queue.max_waiting = (n > 0).then_some(n);
        }
        if let Some(ms) = vars.parse("VELOPIPE_TASK_TIMEOUT_MS") {
            config.queue.task_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(n) = vars.parse("VELOPIPE_CHUNK_SIZE") {
            config.batch.chunk_size = n;
        }
        if let Some(secs) = vars.parse("VELOPIPE_CHUNK_TIMEOUT_SECS") {
            config.batch.chunk_timeout = Some(Duration::from_secs(secs));
        }

        if vars.parse("VELOPIPE_RATE_LIMIT_ENABLED").unwrap_or(false) {
            let mut rate = RateLimiterConfig::default();
            if let Some(capacity) = vars.parse("VELOPIPE_RATE_CAPACITY") {
                rate.capacity = capacity;
            }
            if let Some(refill) = vars.parse("VELOPIPE_RATE_REFILL") {
                rate.refill_amount = refill;
            }
            if let Some(secs) = vars.parse("VELOPIPE_RATE_INTERVAL_SECS") {
                rate.refill_interval = Duration::from_secs(secs);
            }
            if let Some(ms) = vars.parse("VELOPIPE_RATE_WAIT_MS") {
                rate.policy = ExhaustedPolicy::Wait(Duration::from_millis(ms));
            }
            config.rate_limit = Some(rate);
        }

        if let Some(ms) = vars.parse("VELOPIPE_FETCH_TIMEOUT_MS") {
            config.fetcher.fetch_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(n) = vars.parse("VELOPIPE_METRICS_WINDOW") {
            config.metrics.window_size = n;
        }
        if let Some(secs) = vars.parse("VELOPIPE_METRICS_RESET_SECS") {
            config.metrics.reset_interval = Some(Duration::from_secs(secs));
        }

        config
    }

    /// Check every component; the first problem found is returned
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.batch.validate()?;
        if let Some(rate) = &self.rate_limit {
            rate.validate()?;
        }
        self.fetcher.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

struct EnvVars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvVars<F> {
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable environment variable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue.max_concurrent, 20);
        assert_eq!(config.batch.chunk_size, 100);
        assert_eq!(config.batch.chunk_timeout, Some(Duration::from_secs(300)));
        assert!(config.rate_limit.is_none());
        assert_eq!(config.metrics.window_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(PipelineConfig::low_latency().validate().is_ok());
        assert!(PipelineConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = PipelineConfig::from_lookup(|_| None);
        assert_eq!(config.queue.max_concurrent, 20);
        assert!(config.queue.task_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("VELOPIPE_MAX_CONCURRENT", "8"),
            ("VELOPIPE_QUEUE_POLICY", "reject"),
            ("VELOPIPE_MAX_WAITING", "50"),
            ("VELOPIPE_TASK_TIMEOUT_MS", "1500"),
            ("VELOPIPE_CHUNK_SIZE", "25"),
            ("VELOPIPE_FETCH_TIMEOUT_MS", "200"),
            ("VELOPIPE_METRICS_WINDOW", "256"),
            ("VELOPIPE_METRICS_RESET_SECS", "3600"),
        ]));

        assert_eq!(config.queue.max_concurrent, 8);
        assert_eq!(config.queue.full_policy, QueueFullPolicy::Reject);
        assert_eq!(config.queue.max_waiting, Some(50));
        assert_eq!(config.queue.task_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.batch.chunk_size, 25);
        assert_eq!(config.fetcher.fetch_timeout, Some(Duration::from_millis(200)));
        assert_eq!(config.metrics.window_size, 256);
        assert_eq!(config.metrics.reset_interval, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_rate_limit_from_env() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("VELOPIPE_RATE_LIMIT_ENABLED", "true"),
            ("VELOPIPE_RATE_CAPACITY", "10"),
            ("VELOPIPE_RATE_WAIT_MS", "250"),
        ]));

        let rate = config.rate_limit.unwrap();
        assert_eq!(rate.capacity, 10.0);
        assert_eq!(rate.refill_amount, 100.0);
        assert_eq!(rate.refill_interval, Duration::from_secs(60));
        assert_eq!(rate.policy, ExhaustedPolicy::Wait(Duration::from_millis(250)));
    }

    #[test]
    fn test_rate_limit_disabled_ignores_rate_vars() {
        let config = PipelineConfig::from_lookup(lookup(&[("VELOPIPE_RATE_CAPACITY", "10")]));
        assert!(config.rate_limit.is_none());
    }

    #[test]
    fn test_bad_values_ignored_then_validated() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("VELOPIPE_MAX_CONCURRENT", "lots"),
            ("VELOPIPE_MAX_WAITING", "0"),
        ]));
        assert_eq!(config.queue.max_concurrent, 20);
        assert!(config.queue.max_waiting.is_none());

        let config = PipelineConfig::from_lookup(lookup(&[("VELOPIPE_MAX_CONCURRENT", "0")]));
        assert!(config.validate().is_err());
    }
}
