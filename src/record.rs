//! Filepath: src/record.rs
//!
//! Lock records and their attributes.
//!
//! A [`LockRecord`] is an immutable value: one session's lock on one path.
//! Upgrades, rescoping and reentry all build a new record that replaces the
//! old one under the node mutex.
//!
//! Record identity (equality and hashing) is `(session, type, path)`. The
//! scope and the reentrant count are deliberately left out, so a set of
//! records holds at most one entry per session, type and path.

use std::fmt as StdFmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::LockError;
use crate::path::LockPath;
use crate::session::SessionId;

// ============================================================================
//  LockType / LockScope
// ============================================================================

/// Shared or exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockType {
    /// Shared access. Any number of sessions may read-lock a path.
    Read,
    /// Exclusive access.
    Write,
}

impl LockType {
    /// Wire code: `"r"` or `"w"`.
    #[must_use]
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
        }
    }
}

impl FromStr for LockType {
    type Err = LockError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            other => Err(LockError::InvalidCode {
                kind: "lock type",
                code: other.to_string(),
            }),
        }
    }
}

impl StdFmt::Display for LockType {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(self.as_code())
    }
}

/// Whether a lock covers only its path or the whole subtree below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockScope {
    /// The path alone.
    Shallow,
    /// The path and every extension of it.
    Deep,
}

impl LockScope {
    /// Wire code: `"s"` or `"d"`.
    #[must_use]
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::Shallow => "s",
            Self::Deep => "d",
        }
    }
}

impl FromStr for LockScope {
    type Err = LockError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "s" => Ok(Self::Shallow),
            "d" => Ok(Self::Deep),
            other => Err(LockError::InvalidCode {
                kind: "lock scope",
                code: other.to_string(),
            }),
        }
    }
}

impl StdFmt::Display for LockScope {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(self.as_code())
    }
}

// ============================================================================
//  Outcome
// ============================================================================

/// Result of a lock or release, in the vocabulary of a request/response
/// binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The lock was granted.
    Created,
    /// The lock conflicts with another session's lock.
    Conflict,
    /// The lock was released.
    Removed,
    /// There was nothing to release.
    NotHeld,
}

impl Outcome {
    /// Map the result of an acquisition.
    #[must_use]
    pub const fn from_acquire(granted: bool) -> Self {
        if granted { Self::Created } else { Self::Conflict }
    }

    /// Map the result of a release.
    #[must_use]
    pub const fn from_release(released: bool) -> Self {
        if released { Self::Removed } else { Self::NotHeld }
    }

    /// True for [`Created`](Self::Created) and [`Removed`](Self::Removed).
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Removed)
    }
}

// ============================================================================
//  LockRecord
// ============================================================================

/// One session's lock on one path.
#[derive(Clone)]
pub struct LockRecord {
    session: SessionId,
    path: LockPath,
    lock_type: LockType,
    scope: LockScope,
    count: u32,
}

impl LockRecord {
    /// A fresh record with a reentrant count of 1.
    #[must_use]
    pub const fn new(session: SessionId, path: LockPath, lock_type: LockType, scope: LockScope) -> Self {
        Self {
            session,
            path,
            lock_type,
            scope,
            count: 1,
        }
    }

    /// Owning session.
    #[inline]
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.session
    }

    /// Locked path.
    #[inline]
    #[must_use]
    pub const fn path(&self) -> &LockPath {
        &self.path
    }

    /// Read or write.
    #[inline]
    #[must_use]
    pub const fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Shallow or deep.
    #[inline]
    #[must_use]
    pub const fn scope(&self) -> LockScope {
        self.scope
    }

    /// Reentrant count, always at least 1.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// True for a deep lock.
    #[inline]
    #[must_use]
    pub const fn is_deep(&self) -> bool {
        matches!(self.scope, LockScope::Deep)
    }

    /// Re-entry as `lock_type` with `scope`: one more acquisition.
    #[must_use]
    pub(crate) fn reenter(&self, lock_type: LockType, scope: LockScope) -> Self {
        Self {
            session: self.session.clone(),
            path: self.path.clone(),
            lock_type,
            scope,
            count: self.count.saturating_add(1),
        }
    }

    /// Same lock with a different scope.
    #[must_use]
    pub(crate) fn with_scope(&self, scope: LockScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// One acquisition fewer, or `None` when this was the last one.
    #[must_use]
    pub(crate) fn released_once(&self) -> Option<Self> {
        (self.count > 1).then(|| Self {
            count: self.count - 1,
            ..self.clone()
        })
    }
}

impl PartialEq for LockRecord {
    fn eq(&self, other: &Self) -> bool {
        self.lock_type == other.lock_type
            && self.session == other.session
            && self.path == other.path
    }
}

impl Eq for LockRecord {}

impl Hash for LockRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session.hash(state);
        self.lock_type.hash(state);
        self.path.hash(state);
    }
}

impl StdFmt::Debug for LockRecord {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("LockRecord")
            .field("session", &self.session)
            .field("path", &self.path)
            .field("type", &self.lock_type)
            .field("scope", &self.scope)
            .field("count", &self.count)
            .finish()
    }
}

impl StdFmt::Display for LockRecord {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(
            f,
            "{}:{}{}:/{}#{}",
            self.session, self.lock_type, self.scope, self.path, self.count
        )
    }
}
