//! Filepath: src/config.rs
//!
//! Lock manager configuration.

use std::time::Duration;

/// Default session time-to-live.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(50);

/// Environment variable overriding the session timeout, in milliseconds.
pub const SESSION_TIMEOUT_ENV: &str = "LOCKTREE_SESSION_TIMEOUT_MS";

/// Settings for [`LockManager::new`](crate::LockManager::new).
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use locktree::LockManagerConfig;
///
/// let config = LockManagerConfig::default().with_session_timeout(Duration::from_secs(5));
/// assert_eq!(config.session_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockManagerConfig {
    /// How long a session stays alive without a lock operation or heartbeat.
    pub session_timeout: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl LockManagerConfig {
    /// Defaults, overridden by `LOCKTREE_SESSION_TIMEOUT_MS` when it is set
    /// to a whole number of milliseconds. Anything else is ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_value(std::env::var(SESSION_TIMEOUT_ENV).ok().as_deref())
    }

    /// Replace the session timeout.
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    fn with_env_value(self, value: Option<&str>) -> Self {
        match value.map(str::trim).and_then(|v| v.parse::<u64>().ok()) {
            Some(ms) => self.with_session_timeout(Duration::from_millis(ms)),
            None => self,
        }
    }
}
