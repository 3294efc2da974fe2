//! Filepath: src/error.rs
//!
//! Errors surfaced by the lock manager.
//!
//! Ordinary lock conflicts are not errors: lock operations report them as
//! `false`. [`LockError`] covers rejected input, rescoping a lock that is not
//! held, and setup failures.

use std::fmt as StdFmt;

use crate::path::LockPath;
use crate::session::SessionId;

// ============================================================================
//  LockError
// ============================================================================

/// Errors returned by [`LockManager`](crate::LockManager) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A session id was empty.
    EmptySessionId,

    /// `multi_lock` was called with no paths.
    EmptyPathSet,

    /// A wire code did not name a lock type or scope.
    InvalidCode {
        /// What was being decoded (`"lock type"` or `"lock scope"`).
        kind: &'static str,
        /// The rejected input.
        code: String,
    },

    /// The session holds no lock of the requested type at `path`.
    NotHeld {
        /// Session that asked.
        session: SessionId,
        /// Path it asked about.
        path: LockPath,
    },

    /// The expiry worker thread could not be started.
    TimerSpawn(String),
}

impl StdFmt::Display for LockError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::EmptySessionId => write!(f, "session id must not be empty"),

            Self::EmptyPathSet => write!(f, "multi-lock needs at least one path"),

            Self::InvalidCode { kind, code } => {
                write!(f, "invalid {kind} code {code:?}")
            }

            Self::NotHeld { session, path } => {
                write!(f, "session {session} holds no such lock on /{path}")
            }

            Self::TimerSpawn(reason) => {
                write!(f, "failed to start expiry worker: {reason}")
            }
        }
    }
}

impl std::error::Error for LockError {}
