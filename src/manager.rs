//! Filepath: src/manager.rs
//!
//! The lock coordinator.
//!
//! [`LockManager`] owns the root of the lock tree, the session registry and
//! the expiry worker. Every operation walks the tree from the root with
//! lock coupling (see [`traverse`]), decides at the destination node (see
//! [`install`]) and, where counters must shrink, walks the path again after
//! the destination is unlocked.
//!
//! Conflicts never block: a request that cannot be granted right now
//! returns `false`.
//!
//! # Lock Order
//!
//! 1. node mutexes, root to leaf, at most parent and child at once
//! 2. a session's held-node mutex, under at most one node mutex
//! 3. the registry mutex, never under a node mutex
//! 4. a session's timer slot, then the timer queue

use std::collections::HashSet;
use std::fmt as StdFmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::LockManagerConfig;
use crate::error::LockError;
use crate::expiry::{ExpiryTimer, TimerHandle};
use crate::node::{NodeGuard, NodeRef, PathNode, lock_node};
use crate::path::LockPath;
use crate::record::{LockRecord, LockScope, LockType};
use crate::session::{Closing, Session, SessionId, SessionRegistry};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

mod install;
mod traverse;


use install::Install;
use traverse::WalkStop;

// ============================================================================
//  Teardown wait
// ============================================================================

/// Wait step while a previous lifecycle of a session id is torn down.
///
/// Spins first, then yields, then sleeps briefly, so a long cascade does
/// not keep a core busy.
fn teardown_backoff(spins: &mut usize) {
    *spins += 1;
    if *spins <= 64 {
        std::hint::spin_loop();
    } else if *spins <= 1024 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_micros(10));
    }
}

// ============================================================================
//  Inner
// ============================================================================

/// State shared between the manager handle and the expiry worker.
pub(crate) struct Inner {
    pub(crate) root: NodeRef,
    pub(crate) registry: SessionRegistry,
}

impl Inner {
    /// One attempt at a lock for an already touched session.
    ///
    /// `None` means the session was closing and nothing changed.
    fn try_lock(
        &self,
        session: &Arc<Session>,
        path: &LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> Option<bool> {
        let Some((node_ref, mut node)) = self.acquire_path(session.id(), path, lock_type) else {
            return Some(false);
        };

        let outcome = match lock_type {
            LockType::Read => Self::set_read_lock(&mut node, &node_ref, session, path, scope),
            LockType::Write => Self::set_write_lock(&mut node, &node_ref, session, path, scope),
        };
        drop(node);

        match outcome {
            Install::Granted { superseded } => {
                if let Some(old) = superseded {
                    self.release_path(path, old);
                }
                Some(true)
            }
            Install::Refused => {
                debug_log!(session = %session.id(), path = %path, ?lock_type, ?scope, "refused at destination");
                self.release_path(path, lock_type);
                Some(false)
            }
            Install::SessionClosed => {
                self.release_path(path, lock_type);
                None
            }
        }
    }

    /// One attempt at releasing `path` for an open session.
    ///
    /// `None` means the session started closing and nothing changed. The
    /// record is only touched if the session's map names this exact node,
    /// so a release can never act on a record of another lifecycle of the
    /// same id.
    fn try_release(&self, owner: &Session, path: &LockPath) -> Option<bool> {
        let Some(mut node) = self.find_existing(path) else {
            return Some(false);
        };
        if !owner.holds(path, NodeGuard::mutex(&node))? {
            return Some(false);
        }
        let Some(record) = node.record_for(owner.id()).cloned() else {
            warn_log!(session = %owner.id(), path = %path, "held entry without record");
            return Some(false);
        };

        if let Some(remaining) = record.released_once() {
            node.replace_lock(remaining);
            return Some(true);
        }

        node.remove_lock(owner.id());
        owner.unregister(path);
        drop(node);
        self.release_path(path, record.lock_type());
        trace_log!("record removed");
        Some(true)
    }

    /// Remove every record of a closing session, then drop it from the
    /// registry.
    fn cascade(&self, closing: Closing) {
        let Closing { session, held } = closing;
        let mut released = 0_usize;

        for (path, node_ref) in held {
            let removed = lock_node(&node_ref).remove_lock(session.id());
            if let Some(record) = removed {
                self.release_path(&path, record.lock_type());
                released += 1;
            }
        }

        self.registry.finish_close(&session);
        debug_log!(session = %session.id(), released, "session closed");
    }

    fn expire(&self, id: &SessionId, fired: &TimerHandle) {
        if let Some(closing) = self.registry.begin_close(id, Some(fired)) {
            debug_log!(session = %id, "session expired");
            self.cascade(closing);
        }
    }
}

// ============================================================================
//  LockManager
// ============================================================================

/// Hierarchical read/write lock manager with session leases.
///
/// # Example
///
/// ```rust
/// use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, SessionId};
///
/// let manager = LockManager::new(LockManagerConfig::default()).unwrap();
/// let alice = SessionId::new("alice").unwrap();
/// let bob = SessionId::new("bob").unwrap();
/// let docs = LockPath::from(["docs"]);
///
/// assert!(manager.write_lock(&alice, &docs, LockScope::Deep));
/// assert!(!manager.read_lock(&bob, &docs.child("a"), LockScope::Shallow));
/// assert!(manager.release(&alice, &docs));
/// assert!(manager.read_lock(&bob, &docs.child("a"), LockScope::Shallow));
/// ```
pub struct LockManager {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl LockManager {
    /// Create a manager and start its expiry worker.
    ///
    /// # Errors
    ///
    /// [`LockError::TimerSpawn`] if the worker thread cannot be started.
    pub fn new(config: LockManagerConfig) -> Result<Self, LockError> {
        let timer: ExpiryTimer<SessionId> = ExpiryTimer::new();
        let inner = Arc::new(Inner {
            root: PathNode::root(),
            registry: SessionRegistry::new(config.session_timeout, timer.clone()),
        });

        let weak = Arc::downgrade(&inner);
        let worker = timer
            .start(move |id, fired| {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&id, fired);
                }
            })
            .map_err(|err| LockError::TimerSpawn(err.to_string()))?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Current session time-to-live.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.inner.registry.session_timeout()
    }

    /// Change the session time-to-live. Applies from each session's next
    /// lock operation or heartbeat.
    pub fn set_session_timeout(&self, timeout: Duration) {
        self.inner.registry.set_session_timeout(timeout);
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    // ========================================================================
    //  Acquisition
    // ========================================================================

    /// Acquire a READ lock.
    #[must_use]
    pub fn read_lock(&self, session: &SessionId, path: &LockPath, scope: LockScope) -> bool {
        self.lock(session, path, LockType::Read, scope)
    }

    /// Acquire a WRITE lock.
    #[must_use]
    pub fn write_lock(&self, session: &SessionId, path: &LockPath, scope: LockScope) -> bool {
        self.lock(session, path, LockType::Write, scope)
    }

    /// Acquire a lock, touching the session.
    ///
    /// Re-locking a path the session already holds upgrades, downgrades or
    /// rescopes the record and raises its reentrant count. Returns `false`
    /// on conflict.
    ///
    /// Conflicts with other sessions never wait. The one wait is on the
    /// session's own id: if an earlier lifecycle of it is still being torn
    /// down by `release_session` or expiry, the call backs off until that
    /// teardown has finished, then starts a fresh lifecycle. The wait is
    /// bounded by the size of the earlier lifecycle's lock set.
    #[must_use]
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(session = %session, path = %path, ?lock_type, ?scope))
    )]
    pub fn lock(
        &self,
        session: &SessionId,
        path: &LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> bool {
        let mut spins = 0_usize;
        loop {
            let owner = self.inner.registry.touch(session);
            let attempt = if owner.is_closed() {
                None
            } else {
                self.inner.try_lock(&owner, path, lock_type, scope)
            };
            if let Some(granted) = attempt {
                trace_log!(granted, "lock done");
                return granted;
            }
            teardown_backoff(&mut spins);
        }
    }

    /// Acquire locks on all `paths` or none of them.
    ///
    /// Paths are taken in canonical order. On the first conflict every lock
    /// taken by this call is released again and `false` is returned.
    ///
    /// # Errors
    ///
    /// [`LockError::EmptyPathSet`] if `paths` is empty. Nothing is touched.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(session = %session, paths = paths.len(), ?lock_type, ?scope))
    )]
    pub fn multi_lock(
        &self,
        session: &SessionId,
        paths: &[LockPath],
        lock_type: LockType,
        scope: LockScope,
    ) -> Result<bool, LockError> {
        if paths.is_empty() {
            return Err(LockError::EmptyPathSet);
        }

        let mut ordered: Vec<&LockPath> = paths.iter().collect();
        ordered.sort();

        for (taken, path) in ordered.iter().enumerate() {
            if !self.lock(session, path, lock_type, scope) {
                debug_log!(at = %path, taken, "multi-lock conflict, rolling back");
                for acquired in &ordered[..taken] {
                    if !self.release(session, acquired) {
                        warn_log!(path = %acquired, "rollback found nothing to release");
                    }
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Acquire a lock wrapped in a guard that releases it on drop.
    #[must_use]
    pub fn scoped(
        &self,
        session: &SessionId,
        path: &LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> Option<crate::scoped::ScopedLock<'_>> {
        self.lock(session, path, lock_type, scope)
            .then(|| crate::scoped::ScopedLock::new(self, session.clone(), path.clone(), lock_type, scope))
    }

    // ========================================================================
    //  Rescoping
    // ========================================================================

    /// Turn the session's `lock_type` lock at `path` into a DEEP lock.
    ///
    /// Returns `false` if it already is deep, if anything else is locked
    /// below it, or if a conflicting deep lock lies on the way.
    ///
    /// # Errors
    ///
    /// [`LockError::NotHeld`] if the session holds no such lock.
    pub fn up_scope(
        &self,
        session: &SessionId,
        path: &LockPath,
        lock_type: LockType,
    ) -> Result<bool, LockError> {
        self.rescope(session, path, lock_type, LockScope::Deep)
    }

    /// Turn the session's `lock_type` lock at `path` into a SHALLOW lock.
    ///
    /// # Errors
    ///
    /// [`LockError::NotHeld`] if the session holds no such lock.
    pub fn down_scope(
        &self,
        session: &SessionId,
        path: &LockPath,
        lock_type: LockType,
    ) -> Result<bool, LockError> {
        self.rescope(session, path, lock_type, LockScope::Shallow)
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(session = %session, path = %path, ?lock_type, ?scope))
    )]
    fn rescope(
        &self,
        session: &SessionId,
        path: &LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> Result<bool, LockError> {
        let mut spins = 0_usize;
        loop {
            let owner = self.inner.registry.touch(session);
            if owner.is_closed() {
                teardown_backoff(&mut spins);
                continue;
            }
            return match self.inner.find_existing_checked(session, path, lock_type) {
                Ok(node) if owner.holds(path, NodeGuard::mutex(&node)).is_none() => {
                    drop(node);
                    teardown_backoff(&mut spins);
                    continue;
                }
                Ok(mut node) => Inner::set_lock_scope(&mut node, &owner, lock_type, scope),
                Err(WalkStop::Conflict) => Ok(false),
                Err(WalkStop::Missing) => Err(LockError::NotHeld {
                    session: session.clone(),
                    path: path.clone(),
                }),
            };
        }
    }

    // ========================================================================
    //  Release
    // ========================================================================

    /// Release one acquisition of the session's lock at `path`.
    ///
    /// The record goes away once its reentrant count reaches zero. Returns
    /// `false` if the session holds no lock there. Like [`lock`](Self::lock),
    /// waits out the teardown of an earlier lifecycle of the id.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(session = %session, path = %path))
    )]
    pub fn release(&self, session: &SessionId, path: &LockPath) -> bool {
        let mut spins = 0_usize;
        loop {
            let Some(owner) = self.inner.registry.refresh(session) else {
                return false;
            };
            if !owner.is_closed() {
                if let Some(released) = self.inner.try_release(&owner, path) {
                    return released;
                }
            }
            teardown_backoff(&mut spins);
        }
    }

    /// Release each of `paths` independently. Returns how many were
    /// released.
    pub fn release_paths(&self, session: &SessionId, paths: &[LockPath]) -> usize {
        paths
            .iter()
            .filter(|path| self.release(session, path))
            .count()
    }

    /// Drop every lock of the session, whatever its reentrant counts, and
    /// forget the session.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(session = %session))
    )]
    pub fn release_session(&self, session: &SessionId) {
        if let Some(closing) = self.inner.registry.begin_close(session, None) {
            self.inner.cascade(closing);
        }
    }

    // ========================================================================
    //  Sessions
    // ========================================================================

    /// Keep the session alive for another timeout period, creating it if
    /// needed.
    pub fn heartbeat(&self, session: &SessionId) {
        self.inner.registry.touch(session);
    }

    /// Snapshot of the session's locks. Does not touch the session.
    ///
    /// Weakly consistent under concurrent mutation.
    #[must_use]
    pub fn locks(&self, session: &SessionId) -> HashSet<LockRecord> {
        let Some(owner) = self.inner.registry.get(session) else {
            return HashSet::new();
        };
        owner
            .held_nodes()
            .into_iter()
            .filter_map(|(_, node)| node.lock().record_for(session).cloned())
            .collect()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.inner.registry.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn_log!("expiry worker panicked");
            }
        }
    }
}

impl StdFmt::Debug for LockManager {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("LockManager")
            .field("sessions", &self.session_count())
            .field("session_timeout", &self.session_timeout())
            .finish_non_exhaustive()
    }
}
