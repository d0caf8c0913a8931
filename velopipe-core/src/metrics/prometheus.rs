//! Prometheus metrics for velopipe
//!
//! Each exporter owns its own registry, so several pipelines in one process
//! never collide. Values are copied from a [`PipelineSnapshot`] on `observe`.

use prometheus::{Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::pipeline::PipelineSnapshot;

const NAMESPACE: &str = "velopipe";

/// Quantile labels, in the order of the snapshot fields they mirror
const QUANTILES: [&str; 3] = ["0.5", "0.95", "0.99"];

/// Prometheus gauges mirroring a pipeline snapshot
pub struct PipelineExporter {
    registry: Registry,

    // ============== Request Metrics ==============
    requests: GaugeVec,
    success_rate: Gauge,
    latency_ms: GaugeVec,
    latency_mean_ms: Gauge,
    latency_max_ms: Gauge,

    // ============== Queue Metrics ==============
    queue_events: GaugeVec,
    queue_in_flight: Gauge,
    queue_waiting: Gauge,
    queue_peak_in_flight: Gauge,
    queue_max_concurrent: Gauge,

    // ============== Rate Limiter Metrics ==============
    rate_limiter_tokens: Gauge,
    rate_limiter_decisions: GaugeVec,
}

fn gauge(name: &str, help: &str) -> prometheus::Result<Gauge> {
    Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

impl PipelineExporter {
    /// Create the gauges and register them with a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let exporter = Self {
            registry: Registry::new(),
            requests: gauge_vec("requests", "Requests seen by the metrics tracker", &["outcome"])?,
            success_rate: gauge("success_rate", "Fraction of attempted requests that succeeded")?,
            latency_ms: gauge_vec(
                "latency_ms",
                "Request latency percentiles over the recent sample window",
                &["quantile"],
            )?,
            latency_mean_ms: gauge("latency_mean_ms", "Mean request latency")?,
            latency_max_ms: gauge("latency_max_ms", "Largest latency in the sample window")?,
            queue_events: gauge_vec("queue_events", "Task queue lifecycle counts", &["event"])?,
            queue_in_flight: gauge("queue_in_flight", "Work items currently running")?,
            queue_waiting: gauge("queue_waiting", "Callers waiting for a queue slot")?,
            queue_peak_in_flight: gauge(
                "queue_peak_in_flight",
                "Highest in-flight count observed",
            )?,
            queue_max_concurrent: gauge(
                "queue_max_concurrent",
                "Concurrency cap of the task queue",
            )?,
            rate_limiter_tokens: gauge("rate_limiter_tokens", "Tokens currently in the bucket")?,
            rate_limiter_decisions: gauge_vec(
                "rate_limiter_decisions",
                "Rate limiter admission decisions",
                &["decision"],
            )?,
        };

        exporter.registry.register(Box::new(exporter.requests.clone()))?;
        exporter.registry.register(Box::new(exporter.success_rate.clone()))?;
        exporter.registry.register(Box::new(exporter.latency_ms.clone()))?;
        exporter.registry.register(Box::new(exporter.latency_mean_ms.clone()))?;
        exporter.registry.register(Box::new(exporter.latency_max_ms.clone()))?;
        exporter.registry.register(Box::new(exporter.queue_events.clone()))?;
        exporter.registry.register(Box::new(exporter.queue_in_flight.clone()))?;
        exporter.registry.register(Box::new(exporter.queue_waiting.clone()))?;
        exporter.registry.register(Box::new(exporter.queue_peak_in_flight.clone()))?;
        exporter.registry.register(Box::new(exporter.queue_max_concurrent.clone()))?;
        exporter.registry.register(Box::new(exporter.rate_limiter_tokens.clone()))?;
        exporter.registry.register(Box::new(exporter.rate_limiter_decisions.clone()))?;

        Ok(exporter)
    }

    /// Copy a snapshot into the gauges
    pub fn observe(&self, snapshot: &PipelineSnapshot) {
        let metrics = &snapshot.metrics;
        self.requests.with_label_values(&["attempted"]).set(metrics.attempted as f64);
        self.requests.with_label_values(&["succeeded"]).set(metrics.succeeded as f64);
        self.requests.with_label_values(&["failed"]).set(metrics.failed as f64);
        self.requests.with_label_values(&["in_progress"]).set(metrics.in_progress as f64);
        self.success_rate.set(metrics.success_rate);

        let percentiles = [metrics.p50_ms, metrics.p95_ms, metrics.p99_ms];
        for (quantile, value) in QUANTILES.iter().zip(percentiles) {
            self.latency_ms.with_label_values(&[*quantile]).set(value);
        }
        self.latency_mean_ms.set(metrics.mean_ms);
        self.latency_max_ms.set(metrics.max_ms);

        let queue = &snapshot.queue;
        let events = [
            ("submitted", queue.submitted),
            ("started", queue.started),
            ("succeeded", queue.succeeded),
            ("failed", queue.failed),
            ("timed_out", queue.timed_out),
            ("rejected", queue.rejected),
        ];
        for (event, count) in events {
            self.queue_events.with_label_values(&[event]).set(count as f64);
        }
        self.queue_in_flight.set(queue.in_flight as f64);
        self.queue_waiting.set(queue.waiting as f64);
        self.queue_peak_in_flight.set(queue.peak_in_flight as f64);
        self.queue_max_concurrent.set(snapshot.max_concurrent as f64);

        if let Some(limiter) = &snapshot.rate_limiter {
            self.rate_limiter_tokens.set(limiter.available_tokens);
            let decisions = [("admitted", limiter.admitted), ("rejected", limiter.rejected)];
            for (decision, count) in decisions {
                self.rate_limiter_decisions.with_label_values(&[decision]).set(count as f64);
            }
        }
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for PipelineExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExporter").finish_non_exhaustive()
    }
}
