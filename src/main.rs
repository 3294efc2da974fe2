//! Hang detector for the lock manager.
//!
//! Hammers one `LockManager` from many threads with overlapping deep and
//! shallow requests while a watchdog reports any thread that stops making
//! progress. A lock-order bug shows up here as a stuck thread rather than
//! as a flaky test.
//!
//! Run with:
//! ```bash
//! RUST_LOG=locktree=debug cargo run --features tracing
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// =============================================================================
// Path Generation
// =============================================================================

/// Depth of generated paths.
const DEPTH: usize = 4;

/// Segments per level. Small, so requests collide.
const FANOUT: u64 = 3;

fn path_for(mut code: u64, depth: usize) -> LockPath {
    (0..depth)
        .map(|_| {
            let segment = format!("n{}", code % FANOUT);
            code /= FANOUT;
            segment
        })
        .collect()
}

/// Cheap per-thread pseudo random stream.
fn next_state(state: u64) -> u64 {
    state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1)
}

// =============================================================================
// Thread progress tracking for hang detection
// =============================================================================

struct ThreadProgress {
    /// Current operation index for each thread
    current_op: Vec<AtomicUsize>,
    /// Path code being processed by each thread
    current_path: Vec<AtomicU64>,
    /// Last time each thread made progress
    last_progress_ms: Vec<AtomicU64>,
    /// Whether each thread is done
    done: Vec<AtomicBool>,
    start: Instant,
}

impl ThreadProgress {
    fn new(num_threads: usize) -> Self {
        Self {
            current_op: (0..num_threads).map(|_| AtomicUsize::new(0)).collect(),
            current_path: (0..num_threads).map(|_| AtomicU64::new(0)).collect(),
            last_progress_ms: (0..num_threads).map(|_| AtomicU64::new(0)).collect(),
            done: (0..num_threads).map(|_| AtomicBool::new(false)).collect(),
            start: Instant::now(),
        }
    }

    fn update(&self, thread_id: usize, op: usize, path_code: u64) {
        self.current_op[thread_id].store(op, Ordering::Relaxed);
        self.current_path[thread_id].store(path_code, Ordering::Relaxed);
        self.last_progress_ms[thread_id]
            .store(self.start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn mark_done(&self, thread_id: usize) {
        self.done[thread_id].store(true, Ordering::Relaxed);
    }

    fn report_stuck(&self, timeout_ms: u64) -> Vec<(usize, usize, u64, u64)> {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let mut stuck = Vec::new();

        for i in 0..self.done.len() {
            if self.done[i].load(Ordering::Relaxed) {
                continue;
            }
            let last = self.last_progress_ms[i].load(Ordering::Relaxed);
            if now_ms.saturating_sub(last) > timeout_ms {
                stuck.push((
                    i,
                    self.current_op[i].load(Ordering::Relaxed),
                    self.current_path[i].load(Ordering::Relaxed),
                    now_ms - last,
                ));
            }
        }
        stuck
    }

    fn all_done(&self) -> bool {
        self.done.iter().all(|d| d.load(Ordering::Relaxed))
    }
}

fn spawn_watchdog(progress: &Arc<ThreadProgress>, stop: &Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let progress = Arc::clone(progress);
    let stop = Arc::clone(stop);
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(500));
            let stuck = progress.report_stuck(2000);
            for (tid, op, code, stall_ms) in &stuck {
                eprintln!(
                    "!!! STUCK: Thread {tid} at op {op} path=/{} for {stall_ms}ms",
                    path_for(*code, DEPTH)
                );
            }
            if progress.all_done() {
                break;
            }
        }
    })
}

// =============================================================================
// Scenario 1: Mixed Deep/Shallow Contention
// =============================================================================

fn run_mixed_contention(lm: &Arc<LockManager>, threads: usize, ops_per_thread: usize) {
    println!("\n{}", "=".repeat(80));
    println!("MIXED CONTENTION ({threads} threads, {ops_per_thread} ops/thread)");
    println!("{}", "=".repeat(80));

    let progress = Arc::new(ThreadProgress::new(threads));
    let stop_watchdog = Arc::new(AtomicBool::new(false));
    let granted = Arc::new(AtomicUsize::new(0));
    let watchdog = spawn_watchdog(&progress, &stop_watchdog);

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let lm = Arc::clone(lm);
            let progress = Arc::clone(&progress);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                let session = SessionId::new(format!("mixed-{t}")).unwrap();
                let mut state = (t as u64 + 1).wrapping_mul(0x517c_c1b7_2722_0a95);
                eprintln!("[T{t:02}] Start");

                for i in 0..ops_per_thread {
                    state = next_state(state);
                    let code = state >> 16;
                    let depth = 1 + (state as usize) % DEPTH;
                    let path = path_for(code, depth);
                    let lock_type = if state & 0x100 == 0 { LockType::Read } else { LockType::Write };
                    let scope = if state & 0x200 == 0 { LockScope::Shallow } else { LockScope::Deep };

                    progress.update(t, i, code);

                    let op_start = Instant::now();
                    if lm.lock(&session, &path, lock_type, scope) {
                        granted.fetch_add(1, Ordering::Relaxed);
                        if !lm.release(&session, &path) {
                            eprintln!("[T{t:02}] ERROR op {i}: granted lock on /{path} not released");
                        }
                    }
                    let op_elapsed = op_start.elapsed();

                    if op_elapsed > Duration::from_millis(100) {
                        eprintln!("[T{t:02}] SLOW op {i} path=/{path} took {op_elapsed:?}");
                    }
                    if i % 10000 == 0 && i > 0 {
                        eprintln!("[T{t:02}] op {i}/{ops_per_thread}");
                    }
                }

                progress.mark_done(t);
                eprintln!("[T{t:02}] DONE");
            })
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }

    stop_watchdog.store(true, Ordering::Relaxed);
    let _ = watchdog.join();

    let elapsed = start.elapsed();
    let total = threads * ops_per_thread;
    println!(
        "MIXED DONE: {total} ops in {elapsed:?} ({:.0} ops/sec), granted={}",
        total as f64 / elapsed.as_secs_f64(),
        granted.load(Ordering::Relaxed)
    );
}

// =============================================================================
// Scenario 2: Multi-lock Batches Plus Session Teardown
// =============================================================================

fn run_batches_with_teardown(lm: &Arc<LockManager>, threads: usize, ops_per_thread: usize) {
    println!("\n{}", "=".repeat(80));
    println!("BATCHES + TEARDOWN ({threads} threads, {ops_per_thread} ops/thread)");
    println!("{}", "=".repeat(80));

    let progress = Arc::new(ThreadProgress::new(threads));
    let stop_watchdog = Arc::new(AtomicBool::new(false));
    let watchdog = spawn_watchdog(&progress, &stop_watchdog);

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let lm = Arc::clone(lm);
            let progress = Arc::clone(&progress);
            thread::spawn(move || {
                let session = SessionId::new(format!("batch-{t}")).unwrap();
                let mut state = (t as u64 + 7).wrapping_mul(0x9e37_79b9_7f4a_7c15);

                for i in 0..ops_per_thread {
                    state = next_state(state);
                    let code = state >> 16;
                    let paths: Vec<LockPath> =
                        (0..3).map(|k| path_for(code.rotate_left(k * 7), 2)).collect();

                    progress.update(t, i, code);
                    let _ = lm.multi_lock(&session, &paths, LockType::Write, LockScope::Shallow);

                    // Every so often drop everything at once, wherever the
                    // session happens to be.
                    if i % 64 == 63 {
                        lm.release_session(&session);
                    } else {
                        let _ = lm.release_paths(&session, &paths);
                    }
                }

                lm.release_session(&session);
                progress.mark_done(t);
            })
        })
        .collect();

    for h in handles {
        let _ = h.join();
    }

    stop_watchdog.store(true, Ordering::Relaxed);
    let _ = watchdog.join();

    println!(
        "BATCHES DONE: {} ops in {:?}, sessions left={}",
        threads * ops_per_thread,
        start.elapsed(),
        lm.session_count()
    );
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    locktree::init_tracing();

    eprintln!("Lock Manager Hang Detector");
    eprintln!("==========================");
    eprintln!("Watchdog will report any thread stuck for >2 seconds.");
    eprintln!();

    let lm = match LockManager::new(LockManagerConfig::from_env()) {
        Ok(lm) => Arc::new(lm),
        Err(err) => {
            eprintln!("cannot start lock manager: {err}");
            std::process::exit(1);
        }
    };

    for run in 1..=5 {
        eprintln!("\n--- Run {run}/5 ---");
        run_mixed_contention(&lm, 8, 50_000);
        run_batches_with_teardown(&lm, 8, 10_000);

        match lm.verify() {
            Ok(()) => eprintln!("tree verified clean"),
            Err(violation) => {
                eprintln!("!!! VERIFY FAILED: {violation}");
                std::process::exit(2);
            }
        }
    }

    eprintln!("\nAll runs completed!");
}
