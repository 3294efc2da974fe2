//! Shared helpers for integration tests: tracing setup and small builders.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let lm = common::manager();
//!     // ...
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `locktree=debug,locktree::manager::traverse=trace`)
//! - `LOCKTREE_LOG_DIR`: Log directory (default: `logs/`)
//! - `LOCKTREE_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! Library events only show up when the crate is built with `--features tracing`.
//!
//! # Log Files
//!
//! Logs go to `logs/locktree.jsonl` as newline-delimited JSON:
//!
//! ```bash
//! # Everything one session did
//! jq 'select(.span.session == "s1")' logs/locktree.jsonl
//!
//! # Only conflicts
//! jq 'select(.fields.message | test("conflict"))' logs/locktree.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use locktree::{LockManager, LockManagerConfig, LockPath, SessionId};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the console and file subscriber. Only the first call does anything.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

/// Where and how test logs are written.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub log_dir: PathBuf,
    pub log_file: String,
    pub console_enabled: bool,
    /// Used when `RUST_LOG` is not set.
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "locktree.jsonl".to_string(),
            console_enabled: true,
            default_level: Level::INFO,
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("LOCKTREE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if env::var("LOCKTREE_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console_enabled = false;
        }

        config
    }
}

fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level}")))
}

#[expect(clippy::expect_used)]
fn setup_tracing() {
    let config = TracingConfig::from_env();

    std::fs::create_dir_all(&config.log_dir).expect("Failed to create log directory");
    let log_path = config.log_dir.join(&config.log_file);

    // Append: test binaries run in separate processes.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("Failed to open log file");

    let console_layer = config.console_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(make_filter(config.default_level))
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(make_filter(config.default_level));

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

// ============================================================================
//  Builders
// ============================================================================

/// A manager with the default 50 s session timeout.
#[expect(clippy::expect_used)]
pub fn manager() -> LockManager {
    LockManager::new(LockManagerConfig::default()).expect("expiry worker starts")
}

/// Session id from a literal.
#[expect(clippy::expect_used)]
pub fn sid(id: &str) -> SessionId {
    SessionId::new(id).expect("non-empty session id")
}

/// Path from literal segments.
pub fn p(segments: &[&str]) -> LockPath {
    LockPath::from(segments)
}
