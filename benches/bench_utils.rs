//! Shared helpers for benchmarks.
//!
//! Goals:
//! - Build every path before timing starts, so benches measure locking only.
//! - Keep path generation deterministic across benches.

#![allow(dead_code)]
#![expect(clippy::cast_possible_truncation)]

use locktree::LockPath;

/// Deterministically generate `n` distinct paths of exactly `depth` segments.
///
/// The last segment carries the index, the ones above it are spread over
/// `fanout` values each, so paths share interior nodes.
pub fn paths(n: usize, depth: usize, fanout: u64) -> Vec<LockPath> {
    assert!(depth > 0, "depth must be > 0");
    assert!(fanout > 0, "fanout must be > 0");

    (0..n)
        .map(|i| {
            let mut code = (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            let mut segments: Vec<String> = (1..depth)
                .map(|_| {
                    let segment = format!("n{}", code % fanout);
                    code /= fanout;
                    segment
                })
                .collect();
            segments.push(format!("leaf{i}"));
            LockPath::from(segments)
        })
        .collect()
}

/// A single chain `c0/c1/.../c{depth-1}`.
pub fn chain(depth: usize) -> LockPath {
    (0..depth).map(|level| format!("c{level}")).collect()
}

/// Generate Zipfian-distributed indices (hot paths requested more often).
/// Uses s=1.0 (standard Zipf), approximated via rejection sampling.
#[expect(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn zipfian_indices(n: usize, count: usize, seed: u64) -> Vec<usize> {
    let mut indices = Vec::with_capacity(count);
    let mut state = seed;

    for _ in 0..count {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        let u = (state >> 33) as f64 / (1u64 << 31) as f64;
        let idx = ((n as f64).powf(1.0 - u) - 1.0).max(0.0) as usize;
        indices.push(idx.min(n - 1));
    }
    indices
}

/// Uniform random indices.
pub fn uniform_indices(n: usize, count: usize, seed: u64) -> Vec<usize> {
    let mut indices = Vec::with_capacity(count);
    let mut state = seed;

    for _ in 0..count {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        indices.push((state as usize) % n);
    }
    indices
}
