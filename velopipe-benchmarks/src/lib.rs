// velopipe Benchmarking Library
//
// Load scenarios for measuring pipeline throughput and latency

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;
use velopipe_core::{
    BatchConfig, FetchOperation, Pipeline, PipelineConfig, PipelineSnapshot, QueueConfig, WorkItem,
};

/// How the simulated work is driven through the pipeline
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkMode {
    /// One `submit` per item, all issued at once
    Queue,
    /// A single chunked batch
    Batch,
    /// One fan-out over every item
    Fetch,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BenchmarkConfig {
    pub name: String,
    pub mode: BenchmarkMode,
    pub items: u32,
    /// Simulated duration of each item
    pub work_ms: u64,
    pub max_concurrent: usize,
    pub chunk_size: usize,
    /// Every n-th item fails (1-based); `None` means no failures
    pub fail_every: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub config: BenchmarkConfig,
    pub wall_time_ms: f64,
    pub throughput_per_sec: f64,
    pub succeeded: u64,
    pub failed: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub peak_in_flight: usize,
    pub timestamp: String,
}

#[derive(Debug, Default)]
pub struct BenchmarkRunner {
    base: PipelineConfig,
}

impl BenchmarkRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `base` for everything the scenario does not set itself
    pub fn with_base_config(mut self, base: PipelineConfig) -> Self {
        self.base = base;
        self
    }

    /// Run a single benchmark configuration on a fresh pipeline
    pub async fn run(&self, config: &BenchmarkConfig) -> anyhow::Result<BenchmarkResult> {
        self.run_with_snapshot(config).await.map(|(result, _)| result)
    }

    /// Like `run`, also returning the final pipeline snapshot
    pub async fn run_with_snapshot(
        &self,
        config: &BenchmarkConfig,
    ) -> anyhow::Result<(BenchmarkResult, PipelineSnapshot)> {
        let pipeline = Pipeline::from_config(self.pipeline_config(config))
            .with_context(|| format!("Invalid pipeline configuration for '{}'", config.name))?;

        info!(
            name = %config.name,
            mode = ?config.mode,
            items = config.items,
            max_concurrent = config.max_concurrent,
            "Running benchmark"
        );

        let start = Instant::now();
        match config.mode {
            BenchmarkMode::Queue => run_queue(&pipeline, config).await,
            BenchmarkMode::Batch => run_batch(&pipeline, config).await?,
            BenchmarkMode::Fetch => run_fetch(&pipeline, config).await,
        }
        let wall = start.elapsed();
        pipeline.shutdown();

        let snapshot = pipeline.snapshot();
        let wall_time_ms = wall.as_secs_f64() * 1000.0;
        let throughput_per_sec = if wall.as_secs_f64() > 0.0 {
            config.items as f64 / wall.as_secs_f64()
        } else {
            0.0
        };

        info!(
            name = %config.name,
            wall_ms = wall_time_ms,
            throughput = throughput_per_sec,
            p99_ms = snapshot.metrics.p99_ms,
            "Benchmark finished"
        );

        let result = BenchmarkResult {
            config: config.clone(),
            wall_time_ms,
            throughput_per_sec,
            succeeded: snapshot.metrics.succeeded,
            failed: snapshot.metrics.failed,
            p50_ms: snapshot.metrics.p50_ms,
            p95_ms: snapshot.metrics.p95_ms,
            p99_ms: snapshot.metrics.p99_ms,
            peak_in_flight: snapshot.queue.peak_in_flight,
            timestamp: Utc::now().to_rfc3339(),
        };
        Ok((result, snapshot))
    }

    fn pipeline_config(&self, config: &BenchmarkConfig) -> PipelineConfig {
        PipelineConfig {
            queue: QueueConfig { max_concurrent: config.max_concurrent, ..self.base.queue.clone() },
            batch: BatchConfig { chunk_size: config.chunk_size, ..self.base.batch.clone() },
            ..self.base.clone()
        }
    }
}

fn simulated_work(index: u32, config: &BenchmarkConfig) -> WorkItem<u32> {
    let work = Duration::from_millis(config.work_ms);
    let fails = config.fail_every.is_some_and(|n| n > 0 && (index + 1) % n == 0);
    WorkItem::new(async move {
        tokio::time::sleep(work).await;
        if fails {
            Err(format!("simulated failure at item {}", index))
        } else {
            Ok(index)
        }
    })
}

async fn run_queue(pipeline: &Pipeline, config: &BenchmarkConfig) {
    let submissions = (0..config.items).map(|i| pipeline.submit(simulated_work(i, config)));
    join_all(submissions).await;
}

async fn run_batch(pipeline: &Pipeline, config: &BenchmarkConfig) -> anyhow::Result<()> {
    pipeline
        .process((0..config.items).collect::<Vec<u32>>(), |i| simulated_work(i, config))
        .await
        .context("Batch rejected")?;
    Ok(())
}

async fn run_fetch(pipeline: &Pipeline, config: &BenchmarkConfig) {
    let operations = (0..config.items)
        .map(|i| FetchOperation::new(format!("source-{}", i), simulated_work(i, config)))
        .collect();
    pipeline.fetch_all(operations).await;
}

/// Get standard benchmark configurations
pub fn get_standard_benchmarks() -> Vec<BenchmarkConfig> {
    vec![
        BenchmarkConfig {
            name: "queue_saturation".to_string(),
            mode: BenchmarkMode::Queue,
            items: 200,
            work_ms: 10,
            max_concurrent: 20,
            chunk_size: 100,
            fail_every: None,
        },
        BenchmarkConfig {
            name: "chunked_batch".to_string(),
            mode: BenchmarkMode::Batch,
            items: 250,
            work_ms: 5,
            max_concurrent: 20,
            chunk_size: 100,
            fail_every: Some(50),
        },
        BenchmarkConfig {
            name: "fan_out".to_string(),
            mode: BenchmarkMode::Fetch,
            items: 8,
            work_ms: 50,
            max_concurrent: 4,
            chunk_size: 100,
            fail_every: Some(4),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(mode: BenchmarkMode) -> BenchmarkConfig {
        BenchmarkConfig {
            name: "test".to_string(),
            mode,
            items: 20,
            work_ms: 10,
            max_concurrent: 5,
            chunk_size: 8,
            fail_every: Some(10),
        }
    }

    #[test]
    fn test_benchmark_configs() {
        let benchmarks = get_standard_benchmarks();
        assert_eq!(benchmarks.len(), 3);
        assert_eq!(benchmarks[0].name, "queue_saturation");
        assert_eq!(benchmarks[1].mode, BenchmarkMode::Batch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_scenario() {
        let result = BenchmarkRunner::new().run(&scenario(BenchmarkMode::Queue)).await.unwrap();

        assert_eq!(result.succeeded, 18);
        assert_eq!(result.failed, 2);
        assert_eq!(result.peak_in_flight, 5);
        // Four waves of five
        assert!(result.wall_time_ms >= 40.0 && result.wall_time_ms < 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_and_fetch_scenarios() {
        let runner = BenchmarkRunner::new();
        for mode in [BenchmarkMode::Batch, BenchmarkMode::Fetch] {
            let result = runner.run(&scenario(mode)).await.unwrap();
            assert_eq!(result.succeeded + result.failed, 20);
            assert_eq!(result.failed, 2);
            assert!(result.peak_in_flight <= 5);
        }
    }

    #[tokio::test]
    async fn test_invalid_scenario_is_an_error() {
        let mut config = scenario(BenchmarkMode::Queue);
        config.max_concurrent = 0;
        assert!(BenchmarkRunner::new().run(&config).await.is_err());
    }

    #[test]
    fn test_result_serializes() {
        let result = BenchmarkResult {
            config: scenario(BenchmarkMode::Fetch),
            wall_time_ms: 12.5,
            throughput_per_sec: 1600.0,
            succeeded: 18,
            failed: 2,
            p50_ms: 10.0,
            p95_ms: 10.0,
            p99_ms: 10.0,
            peak_in_flight: 5,
            timestamp: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["config"]["mode"], "fetch");
        assert_eq!(json["succeeded"], 18);
    }
}
