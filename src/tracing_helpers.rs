//! Feature-gated logging macros.
//!
//! With the `tracing` feature the macros forward to the `tracing` crate.
//! Without it (the default) they expand to nothing, so the lock hot path
//! carries no logging cost at all.
//!
//! # Usage
//!
//! ```bash
//! # Plain build, no logging compiled in
//! cargo build --release
//!
//! # Tests with logging
//! cargo test --features tracing
//!
//! # Only the traversal, at trace level
//! RUST_LOG=locktree::manager::traverse=trace cargo test --features tracing deep_write
//! ```
//!
//! # Spans
//!
//! Public operations on [`LockManager`](crate::LockManager) carry
//! `#[cfg_attr(feature = "tracing", tracing::instrument(...))]`, which
//! disappears along with the feature:
//!
//! ```ignore
//! #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self), fields(session = %session)))]
//! pub fn write_lock(&self, session: &SessionId, path: &LockPath, scope: LockScope) -> bool {
//!     // ...
//! }
//! ```
//!
//! The macros are statements. Use them with a trailing `;`, never in
//! expression position.

#![allow(unused_macros, unused_imports)]

/// Trace-level logging. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level logging. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Warn-level logging. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

/// Error-level logging. No-op without the `tracing` feature.
#[cfg(feature = "tracing")]
macro_rules! error_log {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use error_log;
pub(crate) use trace_log;
pub(crate) use warn_log;

/// Install a console subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling it more than once is harmless; later calls leave the first
/// subscriber in place. Without the `tracing` feature this does nothing.
pub fn init_tracing() {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::EnvFilter;

        let filter: EnvFilter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Err only means a global subscriber is already set.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(true)
            .try_init();
    }
}
