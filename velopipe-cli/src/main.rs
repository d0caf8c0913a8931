use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use velopipe_benchmarks::{get_standard_benchmarks, BenchmarkRunner};
use velopipe_core::{PipelineConfig, PipelineExporter, RateLimiter};

#[derive(Parser)]
#[command(name = "velopipe")]
#[command(version = "0.1.0")]
#[command(about = "velopipe - Bounded-concurrency request pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Defaults overridden by VELOPIPE_* environment variables
    Env,
    LowLatency,
    HighThroughput,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective pipeline configuration as JSON
    Config {
        /// Configuration source
        #[arg(short, long, value_enum, default_value = "env")]
        preset: Preset,
    },

    /// Run load scenarios against an in-process pipeline
    Benchmark {
        /// Only run the scenario with this name
        #[arg(short, long)]
        scenario: Option<String>,

        /// Output file for results (JSON)
        #[arg(short, long)]
        output: Option<String>,

        /// Print Prometheus text for each scenario's final state
        #[arg(long)]
        prometheus: bool,
    },

    /// Fire instant requests at a token bucket and count admissions
    Burst {
        /// Bucket capacity
        #[arg(long, default_value_t = 5.0)]
        capacity: f64,

        /// Refill rate in tokens per second
        #[arg(long, default_value_t = 5.0)]
        rate: f64,

        /// Number of requests to fire
        #[arg(long, default_value_t = 20)]
        requests: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("velopipe=info,velopipe_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { preset } => {
            let config = match preset {
                Preset::Env => PipelineConfig::from_env(),
                Preset::LowLatency => PipelineConfig::low_latency(),
                Preset::HighThroughput => PipelineConfig::high_throughput(),
            };
            config.validate().context("Invalid pipeline configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Benchmark { scenario, output, prometheus } => {
            let benchmarks: Vec<_> = get_standard_benchmarks()
                .into_iter()
                .filter(|b| scenario.as_deref().map_or(true, |name| b.name == name))
                .collect();
            if benchmarks.is_empty() {
                anyhow::bail!(
                    "Unknown scenario '{}'",
                    scenario.as_deref().unwrap_or_default()
                );
            }

            println!("velopipe Benchmark Suite\n");
            println!("Running {} benchmarks...\n", benchmarks.len());

            let runner = BenchmarkRunner::new().with_base_config(PipelineConfig::from_env());
            let mut results = Vec::new();
            let mut exports = Vec::new();
            for config in benchmarks {
                match runner.run_with_snapshot(&config).await {
                    Ok((result, snapshot)) => {
                        if prometheus {
                            let exporter = PipelineExporter::new()?;
                            exporter.observe(&snapshot);
                            exports.push((config.name.clone(), exporter.encode()?));
                        }
                        results.push(result);
                    }
                    Err(e) => {
                        eprintln!("Benchmark '{}' failed: {:#}", config.name, e);
                        continue;
                    }
                }
            }

            // Summary
            println!("Benchmark Summary\n");
            for result in &results {
                println!("{}:", result.config.name);
                println!("  Items: {} ({} failed)", result.config.items, result.failed);
                println!("  Throughput: {:.1} items/s", result.throughput_per_sec);
                println!(
                    "  Latency: p50 {:.1}ms, p95 {:.1}ms, p99 {:.1}ms",
                    result.p50_ms, result.p95_ms, result.p99_ms
                );
                println!(
                    "  Peak in-flight: {} / {}",
                    result.peak_in_flight, result.config.max_concurrent
                );
                println!("  Wall time: {:.1}ms", result.wall_time_ms);
                println!();
            }

            for (name, text) in &exports {
                println!("# scenario: {}", name);
                println!("{}", text);
            }

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&results)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write results to {}", path))?;
                println!("Results saved to: {}", path);
            }
        }

        Commands::Burst { capacity, rate, requests } => {
            let limiter = RateLimiter::per_second(capacity, rate)
                .context("Invalid rate limiter parameters")?;

            let admitted = (0..requests).filter(|_| limiter.try_acquire()).count();
            let snapshot = limiter.snapshot();

            println!("Burst of {} requests (capacity {}, {}/s)", requests, capacity, rate);
            println!("  Admitted: {}", admitted);
            println!("  Rejected: {}", requests as usize - admitted);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
