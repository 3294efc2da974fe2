//! Lock Contention Profiling Binary
//!
//! Measures grant and conflict rates and per-request latency while many
//! sessions fight over a small tree. When tracing is enabled, slow requests
//! are written to a JSON log together with the manager's own events.
//!
//! Run with:
//! ```bash
//! # Without tracing (fast, just stats)
//! cargo run --release --features mimalloc --bin lock_contention
//!
//! # With tracing (writes to logs/lock_contention.json)
//! RUST_LOG=locktree=warn,lock_contention=warn cargo run --release --features "mimalloc,tracing" --bin lock_contention
//!
//! # View slow requests:
//! rg "SLOW_LOCK" logs/lock_contention.json
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(feature = "tracing")]
type TracingGuard = tracing_appender::non_blocking::WorkerGuard;

#[cfg(not(feature = "tracing"))]
type TracingGuard = ();

// =============================================================================
// Custom Tracing Initialization (JSON to file)
// =============================================================================

#[cfg(feature = "tracing")]
fn init_json_tracing() -> TracingGuard {
    use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

    let log_dir = "logs";
    let filter_str = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "locktree=warn,lock_contention=warn".to_string());

    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::never(log_dir, "lock_contention.json");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_thread_ids(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .json()
        .with_filter(EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("warn")));

    let _ = tracing_subscriber::registry().with(file_layer).try_init();

    println!("Tracing enabled: logs/lock_contention.json (filter: {filter_str})");

    guard
}

#[cfg(not(feature = "tracing"))]
fn init_json_tracing() -> TracingGuard {
    println!("Tracing disabled (compile with --features tracing)");
}

// =============================================================================
// Request Stats (Thread-Local + Aggregation)
// =============================================================================

/// Per-thread request statistics.
#[derive(Default)]
struct ThreadOpStats {
    granted: u64,
    conflicts: u64,

    /// Latency of every request, in nanoseconds.
    latencies_ns: Vec<u64>,

    /// Number of slow requests (>1ms)
    slow_ops_1ms: u64,

    /// Number of very slow requests (>100ms)
    slow_ops_100ms: u64,
}

impl ThreadOpStats {
    fn record(&mut self, granted: bool, op_ns: u64) {
        if granted {
            self.granted += 1;
        } else {
            self.conflicts += 1;
        }
        self.latencies_ns.push(op_ns);

        if op_ns > 1_000_000 {
            self.slow_ops_1ms += 1;
        }
        if op_ns > 100_000_000 {
            self.slow_ops_100ms += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        self.granted += other.granted;
        self.conflicts += other.conflicts;
        self.latencies_ns.extend(other.latencies_ns);
        self.slow_ops_1ms += other.slow_ops_1ms;
        self.slow_ops_100ms += other.slow_ops_100ms;
    }
}

/// Value at quantile `q` of an ascending slice.
#[expect(clippy::indexing_slicing)]
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

// =============================================================================
// Benchmark Runner
// =============================================================================

struct BenchmarkConfig {
    name: &'static str,
    threads: usize,
    ops_per_thread: usize,
    /// Segments per level of the shared tree.
    fanout: u64,
    depth: usize,
    /// Share of requests that are writes, in percent.
    write_pct: u64,
    /// Share of requests that are deep, in percent.
    deep_pct: u64,
}

struct RunResult {
    elapsed: Duration,
    stats: ThreadOpStats,
}

fn path_for(mut code: u64, fanout: u64, depth: usize) -> LockPath {
    (0..depth)
        .map(|_| {
            let segment = format!("d{}", code % fanout);
            code /= fanout;
            segment
        })
        .collect()
}

fn run_benchmark(config: &BenchmarkConfig) -> RunResult {
    let lm = Arc::new(LockManager::new(LockManagerConfig::default()).unwrap());
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let lm = Arc::clone(&lm);
            let ops = config.ops_per_thread;
            let (fanout, depth) = (config.fanout, config.depth);
            let (write_pct, deep_pct) = (config.write_pct, config.deep_pct);

            thread::spawn(move || {
                let mut stats = ThreadOpStats {
                    latencies_ns: Vec::with_capacity(ops),
                    ..ThreadOpStats::default()
                };
                let session = SessionId::new(format!("p{t}")).unwrap();
                let mut state = (t as u64 + 1).wrapping_mul(0x517c_c1b7_2722_0a95);

                for i in 0..ops {
                    state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    let path_depth = 1 + (state as usize >> 3) % depth;
                    let path = path_for(state >> 24, fanout, path_depth);
                    let lock_type = if (state >> 8) % 100 < write_pct { LockType::Write } else { LockType::Read };
                    let scope = if (state >> 16) % 100 < deep_pct { LockScope::Deep } else { LockScope::Shallow };

                    let op_start = Instant::now();
                    let granted = lm.lock(&session, &path, lock_type, scope);
                    let op_elapsed = op_start.elapsed().as_nanos() as u64;

                    stats.record(granted, op_elapsed);
                    if granted {
                        let _ = lm.release(&session, &path);
                    }

                    if op_elapsed > 100_000_000 {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            thread = t,
                            op_index = i,
                            path = %path,
                            ?lock_type,
                            ?scope,
                            elapsed_ms = op_elapsed as f64 / 1_000_000.0,
                            "SLOW_LOCK"
                        );

                        #[cfg(not(feature = "tracing"))]
                        eprintln!(
                            "[T{:02}] SLOW_LOCK: i={} path=/{} took {:.2}ms",
                            t,
                            i,
                            path,
                            op_elapsed as f64 / 1_000_000.0
                        );
                    }
                }

                stats
            })
        })
        .collect();

    let mut merged = ThreadOpStats::default();
    for h in handles {
        merged.merge(h.join().unwrap());
    }

    if let Err(violation) = lm.verify() {
        println!("!!! VERIFY FAILED after run: {violation}");
    }

    RunResult {
        elapsed: start.elapsed(),
        stats: merged,
    }
}

fn print_stats(config: &BenchmarkConfig, result: &mut RunResult) {
    let elapsed = result.elapsed;
    let stats = &mut result.stats;
    stats.latencies_ns.sort_unstable();

    let total_ops = config.threads * config.ops_per_thread;
    let ops_per_sec = total_ops as f64 / elapsed.as_secs_f64();
    let conflict_pct = stats.conflicts as f64 * 100.0 / total_ops.max(1) as f64;
    let us = |ns: u64| ns as f64 / 1_000.0;

    println!("\n{}", "=".repeat(80));
    println!(
        "RESULTS [{}]: {} threads x {} ops = {} total (fanout {}, depth {}, {}% writes, {}% deep)",
        config.name,
        config.threads,
        config.ops_per_thread,
        total_ops,
        config.fanout,
        config.depth,
        config.write_pct,
        config.deep_pct
    );
    println!("{}", "=".repeat(80));

    println!("\n--- Timing ---");
    println!("Elapsed:     {elapsed:?}");
    println!("Throughput:  {ops_per_sec:.0} req/sec");

    println!("\n--- Outcomes ---");
    println!("Granted:     {}", stats.granted);
    println!("Conflicts:   {} ({conflict_pct:.1}%)", stats.conflicts);

    println!("\n--- Request Latency ---");
    println!("p50:         {:.2} us", us(percentile(&stats.latencies_ns, 0.50)));
    println!("p99:         {:.2} us", us(percentile(&stats.latencies_ns, 0.99)));
    println!("p99.9:       {:.2} us", us(percentile(&stats.latencies_ns, 0.999)));
    println!("Max:         {:.2} us", us(stats.latencies_ns.last().copied().unwrap_or(0)));
    println!("Slow >1ms:   {}", stats.slow_ops_1ms);
    println!("Slow >100ms: {}", stats.slow_ops_100ms);
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    // Initialize JSON tracing to logs/lock_contention.json
    let _guard = init_json_tracing();

    println!("Lock Contention Profiling");
    println!("=========================\n");

    let configs = vec![
        BenchmarkConfig {
            name: "read-mostly",
            threads: 16,
            ops_per_thread: 100_000,
            fanout: 4,
            depth: 3,
            write_pct: 10,
            deep_pct: 10,
        },
        BenchmarkConfig {
            name: "write-heavy",
            threads: 16,
            ops_per_thread: 100_000,
            fanout: 4,
            depth: 3,
            write_pct: 50,
            deep_pct: 25,
        },
        BenchmarkConfig {
            name: "hot-root",
            threads: 32,
            ops_per_thread: 50_000,
            fanout: 2,
            depth: 2,
            write_pct: 30,
            deep_pct: 50,
        },
    ];

    for config in &configs {
        println!(
            "\nRunning [{}]: {} threads x {} ops...",
            config.name, config.threads, config.ops_per_thread
        );

        let mut results: Vec<RunResult> = Vec::new();
        for run in 1..=5 {
            print!("  Run {run}/5... ");
            std::io::Write::flush(&mut std::io::stdout()).unwrap();

            let result = run_benchmark(config);
            println!("{:?}", result.elapsed);
            results.push(result);
        }

        let (slowest_idx, _) = results
            .iter()
            .enumerate()
            .max_by_key(|(_, result)| result.elapsed.as_nanos())
            .unwrap();

        println!("\n>>> Slowest run was #{} <<<", slowest_idx + 1);
        let mut slowest = results.swap_remove(slowest_idx);
        print_stats(config, &mut slowest);
    }
}
