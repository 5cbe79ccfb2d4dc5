//! Sheaf batching benchmark.
//!
//! Simulates many concurrent callers each updating one user's
//! `last_active_at` timestamp. The coordinator batches their calls onto a
//! simulated `users` table, so the table sees a few `WHERE id IN (...)`
//! queries instead of one query per caller.
//!
//! # Usage
//!
//! ```bash
//! # 100 callers, batches of up to 7, 10ms batch timeout, 2 concurrent queries
//! sheaf-bench --callers 100 --batch-size 7 --batch-timeout-ms 10 --concurrency 2
//!
//! # Flaky, slow table and impatient callers
//! sheaf-bench --backend-latency-ms 50 --failure-rate 0.1 --caller-timeout-ms 30
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::cast_precision_loss)] // f64 precision loss acceptable in benchmark stats
#![allow(clippy::cast_possible_truncation)] // Safe casts in benchmark context

mod users;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use hdrhistogram::Histogram;
use sheaf_batch::{CallContext, Coordinator};
use sheaf_core::{BatchConfig, Error};
use tokio::task::JoinSet;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::users::UserStore;

/// Sheaf batching benchmark.
#[derive(Parser, Debug)]
#[command(name = "sheaf-bench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent callers (one user id each).
    #[arg(long, default_value = "100")]
    callers: u64,

    /// Close a batch once it holds this many calls.
    #[arg(long, default_value = "7")]
    batch_size: u32,

    /// Close a batch this long after its first call arrived.
    #[arg(long, default_value = "10")]
    batch_timeout_ms: u64,

    /// Maximum concurrent backend queries.
    #[arg(long, default_value = "2")]
    concurrency: u32,

    /// Timeout for each backend query.
    #[arg(long, default_value = "10000")]
    backend_timeout_ms: u64,

    /// Simulated latency of each backend query.
    #[arg(long, default_value = "5")]
    backend_latency_ms: u64,

    /// Probability that a backend query fails (0.0 to 1.0).
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Per-caller deadline. Unset means callers wait indefinitely.
    #[arg(long)]
    caller_timeout_ms: Option<u64>,

    /// Bound the intake queue. Unset means unbounded.
    #[arg(long)]
    intake_capacity: Option<u32>,

    /// Seed for simulated failures.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Args {
    fn batch_config(&self) -> BatchConfig {
        let mut config = BatchConfig::from_env()
            .with_batch_size(self.batch_size)
            .with_batch_timeout(Duration::from_millis(self.batch_timeout_ms))
            .with_executor_concurrency(self.concurrency)
            .with_backend_call_timeout(Duration::from_millis(self.backend_timeout_ms));
        if let Some(capacity) = self.intake_capacity {
            config = config.with_intake_capacity(capacity);
        }
        config
    }
}

/// Per-outcome tallies across all callers.
#[derive(Debug, Default)]
struct Outcomes {
    ok: u64,
    backend_errors: u64,
    cancelled: u64,
    other: u64,
}

impl Outcomes {
    fn record(&mut self, result: &Result<(), Error>) {
        match result {
            Ok(()) => self.ok += 1,
            Err(Error::Backend(_)) => self.backend_errors += 1,
            Err(e) if e.is_cancellation() => self.cancelled += 1,
            Err(_) => self.other += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.batch_config();
    let store = UserStore::new(
        Duration::from_millis(args.backend_latency_ms),
        args.failure_rate,
        args.seed,
    );

    println!("=== Sheaf Batching Benchmark ===");
    println!("Callers:          {}", args.callers);
    println!("Batch size:       {}", config.batch_size);
    println!("Batch timeout:    {:?}", config.batch_timeout);
    println!("Concurrency:      {}", config.executor_concurrency);
    println!("Backend timeout:  {:?}", config.backend_call_timeout);
    println!("Backend latency:  {} ms", args.backend_latency_ms);
    println!("Failure rate:     {}", args.failure_rate);
    println!();

    let store = Arc::new(store);
    let coordinator = Coordinator::start(config, Arc::clone(&store))?;
    let mut latencies = Histogram::<u64>::new(3)?;

    info!(callers = args.callers, "Starting callers");
    let start = Instant::now();

    let mut callers = JoinSet::new();
    for user_id in 1..=args.callers {
        let handle = coordinator.handle();
        let ctx = args
            .caller_timeout_ms
            .map_or_else(CallContext::background, |ms| {
                CallContext::timeout(Duration::from_millis(ms))
            });
        callers.spawn(async move {
            let started = Instant::now();
            let result = handle.call(&ctx, user_id).await;
            (started.elapsed(), result)
        });
    }

    let mut outcomes = Outcomes::default();
    while let Some(joined) = callers.join_next().await {
        match joined {
            Ok((elapsed, result)) => {
                latencies.record(elapsed.as_micros() as u64)?;
                if let Err(e) = &result {
                    eprintln!("Error updating user timestamp: {e}");
                }
                outcomes.record(&result);
            }
            Err(e) => eprintln!("Caller task failed: {e}"),
        }
    }
    let elapsed = start.elapsed();
    let stats = coordinator.shutdown().await;

    println!("=== Results ===");
    println!("Total time:       {elapsed:.2?}");
    println!(
        "Throughput:       {:.0} calls/sec",
        args.callers as f64 / elapsed.as_secs_f64()
    );
    println!("Succeeded:        {}", outcomes.ok);
    println!("Backend errors:   {}", outcomes.backend_errors);
    println!("Cancelled:        {}", outcomes.cancelled);
    println!("Other errors:     {}", outcomes.other);
    println!();

    println!("=== Batching ===");
    println!("Queries issued:   {}", store.query_count());
    println!("Users touched:    {}", store.user_count());
    println!("Batches (size):   {}", stats.batches_by_size);
    println!("Batches (timer):  {}", stats.batches_by_timeout);
    println!("Batches (drain):  {}", stats.batches_by_shutdown);
    println!("Largest batch:    {}", stats.max_batch_len);
    println!("Max in flight:    {}", stats.max_in_flight_batches);
    println!("Abandoned slots:  {}", stats.abandoned);
    println!();

    println!("=== Latency (per call) ===");
    println!("  p50:   {} us", latencies.value_at_quantile(0.50));
    println!("  p90:   {} us", latencies.value_at_quantile(0.90));
    println!("  p99:   {} us", latencies.value_at_quantile(0.99));
    println!("  max:   {} us", latencies.max());

    Ok(())
}
