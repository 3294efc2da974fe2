//! Benchmarks for the lock manager using divan.
//!
//! Run with: `cargo bench --bench lock_tree`
//! With mimalloc: `cargo bench --bench lock_tree --features mimalloc`

#![expect(clippy::unwrap_used)]

mod bench_utils;

use bench_utils::{chain, paths, uniform_indices, zipfian_indices};
use divan::{Bencher, black_box};
use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
use std::sync::Arc;
use std::thread;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    divan::main();
}

fn manager() -> LockManager {
    LockManager::new(LockManagerConfig::default()).unwrap()
}

fn session(name: &str) -> SessionId {
    SessionId::new(name).unwrap()
}

// =============================================================================
// 01: UNCONTENDED ACQUIRE + RELEASE - Path Depth
// =============================================================================

#[divan::bench_group(name = "01_uncontended_depth")]
mod uncontended_depth {
    use super::{Bencher, LockScope, LockType, black_box, chain, manager, session};

    const DEPTHS: &[usize] = &[1, 2, 4, 8, 16];

    #[divan::bench(args = DEPTHS)]
    fn read_shallow(bencher: Bencher, depth: usize) {
        let lm = manager();
        let s = session("bench");
        let path = chain(depth);
        bencher.bench_local(|| {
            black_box(lm.lock(&s, &path, LockType::Read, LockScope::Shallow));
            black_box(lm.release(&s, &path));
        });
    }

    #[divan::bench(args = DEPTHS)]
    fn write_deep(bencher: Bencher, depth: usize) {
        let lm = manager();
        let s = session("bench");
        let path = chain(depth);
        bencher.bench_local(|| {
            black_box(lm.lock(&s, &path, LockType::Write, LockScope::Deep));
            black_box(lm.release(&s, &path));
        });
    }

    /// Reentry skips node creation and pruning.
    #[divan::bench(args = DEPTHS)]
    fn write_reentrant(bencher: Bencher, depth: usize) {
        let lm = manager();
        let s = session("bench");
        let path = chain(depth);
        assert!(lm.write_lock(&s, &path, LockScope::Shallow));
        bencher.bench_local(|| {
            black_box(lm.lock(&s, &path, LockType::Write, LockScope::Shallow));
            black_box(lm.release(&s, &path));
        });
    }
}

// =============================================================================
// 02: CONFLICT DETECTION
// =============================================================================

#[divan::bench_group(name = "02_conflicts")]
mod conflicts {
    use super::{Bencher, LockPath, LockScope, LockType, black_box, chain, manager, session};

    /// Refused at the destination by a foreign write.
    #[divan::bench]
    fn refused_at_destination(bencher: Bencher) {
        let lm = manager();
        let path = chain(4);
        assert!(lm.write_lock(&session("owner"), &path, LockScope::Shallow));
        let s = session("bench");
        bencher.bench_local(|| black_box(lm.lock(&s, &path, LockType::Read, LockScope::Shallow)));
    }

    /// Refused on the way down by a foreign deep write near the root.
    #[divan::bench]
    fn refused_by_deep_ancestor(bencher: Bencher) {
        let lm = manager();
        assert!(lm.write_lock(&session("owner"), &LockPath::from(["c0"]), LockScope::Deep));
        let s = session("bench");
        let path = chain(8);
        bencher.bench_local(|| black_box(lm.lock(&s, &path, LockType::Read, LockScope::Shallow)));
    }

    /// Deep write refused because the subtree is not empty.
    #[divan::bench]
    fn refused_by_subtree(bencher: Bencher) {
        let lm = manager();
        assert!(lm.read_lock(&session("owner"), &chain(6), LockScope::Shallow));
        let s = session("bench");
        let path = chain(2);
        bencher.bench_local(|| black_box(lm.lock(&s, &path, LockType::Write, LockScope::Deep)));
    }
}

// =============================================================================
// 03: MULTI-LOCK - Batch Size
// =============================================================================

#[divan::bench_group(name = "03_multi_lock")]
mod multi_lock {
    use super::{Bencher, LockScope, LockType, black_box, manager, paths, session};

    #[divan::bench(args = [1, 4, 16, 64])]
    fn write_batch(bencher: Bencher, n: usize) {
        let lm = manager();
        let s = session("bench");
        let batch = paths(n, 3, 4);
        bencher.bench_local(|| {
            black_box(lm.multi_lock(&s, &batch, LockType::Write, LockScope::Shallow).unwrap());
            black_box(lm.release_paths(&s, &batch));
        });
    }

    /// The last path conflicts, so every earlier one is rolled back.
    #[divan::bench(args = [4, 16, 64])]
    fn rollback(bencher: Bencher, n: usize) {
        let lm = manager();
        let batch = paths(n, 3, 4);
        let mut sorted = batch.clone();
        sorted.sort();
        let last = sorted.last().unwrap();
        assert!(lm.write_lock(&session("owner"), last, LockScope::Shallow));

        let s = session("bench");
        bencher.bench_local(|| {
            black_box(lm.multi_lock(&s, &batch, LockType::Write, LockScope::Shallow).unwrap())
        });
    }
}

// =============================================================================
// 04: SESSION TEARDOWN
// =============================================================================

#[divan::bench_group(name = "04_release_session")]
mod release_session {
    use super::{Bencher, LockScope, black_box, manager, paths, session};

    #[divan::bench(args = [16, 256, 4096])]
    fn held_locks(bencher: Bencher, n: usize) {
        let lm = manager();
        let s = session("bench");
        let held = paths(n, 4, 8);
        bencher.bench_local(|| {
            for path in &held {
                black_box(lm.read_lock(&s, path, LockScope::Shallow));
            }
            lm.release_session(&s);
        });
    }
}

// =============================================================================
// 05: CONCURRENT REQUESTS - Thread Scaling
// =============================================================================

#[divan::bench_group(name = "05_concurrent_scaling")]
mod concurrent_scaling {
    use super::{
        Arc, Bencher, LockManager, LockScope, LockType, black_box, manager, paths, session,
        thread, uniform_indices, zipfian_indices,
    };

    const N: usize = 4096;
    const OPS_PER_THREAD: usize = 5_000;

    fn run(bencher: Bencher, threads: usize, indices: &Arc<Vec<usize>>, lock_type: LockType) {
        let lm: Arc<LockManager> = Arc::new(manager());
        let targets = Arc::new(paths(N, 3, 8));

        bencher.bench_local(|| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let lm = Arc::clone(&lm);
                    let targets = Arc::clone(&targets);
                    let indices = Arc::clone(indices);
                    thread::spawn(move || {
                        let s = session(&format!("t{t}"));
                        let offset = t * 7919; // Prime offset per thread
                        let mut granted = 0_usize;
                        for i in 0..OPS_PER_THREAD {
                            let path = &targets[indices[(i + offset) % indices.len()]];
                            if lm.lock(&s, path, lock_type, LockScope::Shallow) {
                                granted += 1;
                                let _ = lm.release(&s, path);
                            }
                        }
                        black_box(granted);
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    }

    #[divan::bench(args = [1, 2, 4, 8, 16])]
    fn reads_uniform(bencher: Bencher, threads: usize) {
        run(bencher, threads, &Arc::new(uniform_indices(N, OPS_PER_THREAD, 42)), LockType::Read);
    }

    #[divan::bench(args = [1, 2, 4, 8, 16])]
    fn writes_uniform(bencher: Bencher, threads: usize) {
        run(bencher, threads, &Arc::new(uniform_indices(N, OPS_PER_THREAD, 42)), LockType::Write);
    }

    #[divan::bench(args = [1, 2, 4, 8, 16])]
    fn writes_zipfian(bencher: Bencher, threads: usize) {
        run(bencher, threads, &Arc::new(zipfian_indices(N, OPS_PER_THREAD, 42)), LockType::Write);
    }
}
