//! Filepath: src/scoped.rs
//!
//! RAII guard over a held lock.

use std::fmt as StdFmt;

use crate::manager::LockManager;
use crate::path::LockPath;
use crate::record::{LockScope, LockType};
use crate::session::SessionId;

/// A lock that is released when the guard goes out of scope.
///
/// Returned by [`LockManager::scoped`]. The guard owns every acquisition it
/// made: the initial one plus one per successful [`reenter`](Self::reenter).
///
/// # Example
///
/// ```rust
/// use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
///
/// let manager = LockManager::new(LockManagerConfig::default()).unwrap();
/// let me = SessionId::new("me").unwrap();
/// let path = LockPath::from(["a"]);
///
/// {
///     let _guard = manager.scoped(&me, &path, LockType::Write, LockScope::Shallow).unwrap();
///     assert_eq!(manager.locks(&me).len(), 1);
/// }
/// assert!(manager.locks(&me).is_empty());
/// ```
#[must_use = "dropping the guard releases the lock immediately"]
pub struct ScopedLock<'a> {
    manager: &'a LockManager,
    session: SessionId,
    path: LockPath,
    lock_type: LockType,
    scope: LockScope,
    acquisitions: u32,
}

impl<'a> ScopedLock<'a> {
    pub(crate) const fn new(
        manager: &'a LockManager,
        session: SessionId,
        path: LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> Self {
        Self {
            manager,
            session,
            path,
            lock_type,
            scope,
            acquisitions: 1,
        }
    }

    /// Owning session.
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.session
    }

    /// Locked path.
    #[must_use]
    pub const fn path(&self) -> &LockPath {
        &self.path
    }

    /// Type the guard acquired with.
    #[must_use]
    pub const fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Scope the guard acquired with.
    #[must_use]
    pub const fn scope(&self) -> LockScope {
        self.scope
    }

    /// Acquisitions this guard will release.
    #[must_use]
    pub const fn acquisitions(&self) -> u32 {
        self.acquisitions
    }

    /// Acquire the same lock once more.
    pub fn reenter(&mut self) -> bool {
        let granted = self
            .manager
            .lock(&self.session, &self.path, self.lock_type, self.scope);
        if granted {
            self.acquisitions += 1;
        }
        granted
    }

    /// Release now. True if every acquisition was still held and released.
    pub fn release(mut self) -> bool {
        self.release_all()
    }

    fn release_all(&mut self) -> bool {
        let mut all = true;
        while self.acquisitions > 0 {
            self.acquisitions -= 1;
            all &= self.manager.release(&self.session, &self.path);
        }
        all
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl StdFmt::Debug for ScopedLock<'_> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("ScopedLock")
            .field("session", &self.session)
            .field("path", &self.path)
            .field("lock_type", &self.lock_type)
            .field("scope", &self.scope)
            .field("acquisitions", &self.acquisitions)
            .finish_non_exhaustive()
    }
}
