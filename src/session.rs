//! Filepath: src/session.rs
//!
//! Sessions and the session registry.
//!
//! A session is the unit of lock ownership and lease expiry. It remembers
//! every node it holds a lock on, so releasing the whole session visits
//! exactly those nodes instead of scanning the tree.
//!
//! # Lifecycle
//!
//! ```text
//!   touch (lock op / heartbeat)           timer fires or release_session
//! ----------------------------> Active ------------------------------> Closing
//!                                 ^  |                                   |
//!                                 +--+ touch: timer re-armed             | cascade done
//!                                                                        v
//!                                                                     removed
//! ```
//!
//! A closing session stays registered until its cascade has removed every
//! record it owned. Touches that hit a closing session report it, and the
//! caller retries once the entry is gone, so a new session under the same
//! id never shares a node record with the old one.
//!
//! # Locking
//!
//! The held-node map is only changed while the corresponding node mutex is
//! held. The registry mutex is never taken while a node mutex is held. The
//! registry mutex may be held while taking a session's held-node or timer
//! mutex, and the timer queue mutex comes last.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt as StdFmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::LockError;
use crate::expiry::{ExpiryTimer, TimerHandle};
use crate::node::NodeRef;
use crate::path::LockPath;
use crate::tracing_helpers::trace_log;

// ============================================================================
//  SessionId
// ============================================================================

/// Identifier of a lock-owning session. Never empty.
///
/// Clones share the same storage.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Validate and wrap an id.
    ///
    /// # Errors
    ///
    /// [`LockError::EmptySessionId`] if `id` is empty.
    pub fn new(id: impl AsRef<str>) -> Result<Self, LockError> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(LockError::EmptySessionId);
        }
        Ok(Self(Arc::from(id)))
    }

    /// The id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SessionId {
    type Error = LockError;

    fn try_from(id: &str) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl TryFrom<String> for SessionId {
    type Error = LockError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl StdFmt::Display for SessionId {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(&self.0)
    }
}

impl StdFmt::Debug for SessionId {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        StdFmt::Debug::fmt(&*self.0, f)
    }
}

// ============================================================================
//  Session
// ============================================================================

#[derive(Default)]
struct Held {
    nodes: HashMap<LockPath, NodeRef>,
    closed: bool,
}

/// A live session: its held nodes and its expiry timer.
pub(crate) struct Session {
    id: SessionId,
    held: Mutex<Held>,
    timer: Mutex<Option<TimerHandle>>,
}

impl Session {
    fn new(id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            held: Mutex::new(Held::default()),
            timer: Mutex::new(None),
        })
    }

    #[inline]
    pub(crate) const fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.held.lock().closed
    }

    /// Record that this session holds a lock on `node`.
    ///
    /// Must be called with `node` locked. Replaces any entry for a node that
    /// was pruned and recreated at `path`. Returns false, registering
    /// nothing, once the session is closing.
    pub(crate) fn register(&self, path: &LockPath, node: &NodeRef) -> bool {
        let mut held = self.held.lock();
        if held.closed {
            return false;
        }
        held.nodes.insert(path.clone(), Arc::clone(node));
        true
    }

    /// Whether this session's map points at exactly `node` for `path`.
    ///
    /// `None` once the session is closing. Must be called with `node`
    /// locked.
    pub(crate) fn holds(&self, path: &LockPath, node: &NodeRef) -> Option<bool> {
        let held = self.held.lock();
        if held.closed {
            return None;
        }
        Some(held.nodes.get(path).is_some_and(|listed| Arc::ptr_eq(listed, node)))
    }

    /// The node this session lists for `path`, if any.
    pub(crate) fn held_node(&self, path: &LockPath) -> Option<NodeRef> {
        self.held.lock().nodes.get(path).map(Arc::clone)
    }

    /// Forget `path`. Must be called with the node at `path` locked.
    pub(crate) fn unregister(&self, path: &LockPath) {
        self.held.lock().nodes.remove(path);
    }

    /// Snapshot of the held nodes.
    pub(crate) fn held_nodes(&self) -> Vec<(LockPath, NodeRef)> {
        self.held
            .lock()
            .nodes
            .iter()
            .map(|(path, node)| (path.clone(), Arc::clone(node)))
            .collect()
    }

    /// Mark the session closing and take its held nodes.
    ///
    /// Only the first call gets the nodes; later calls get `None`.
    fn close(&self) -> Option<Vec<(LockPath, NodeRef)>> {
        let mut held = self.held.lock();
        if held.closed {
            return None;
        }
        held.closed = true;
        Some(held.nodes.drain().collect())
    }

    fn rearm(&self, handle: TimerHandle) {
        let previous = self.timer.lock().replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.cancel();
        }
    }

    fn timer_is(&self, fired: &TimerHandle) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|current| current.same_task(fired) && !current.is_cancelled())
    }
}

impl StdFmt::Debug for Session {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let held = self.held.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("held", &held.nodes.len())
            .field("closed", &held.closed)
            .finish()
    }
}

/// A session taken out of service, with the nodes its cascade must visit.
pub(crate) struct Closing {
    pub(crate) session: Arc<Session>,
    pub(crate) held: Vec<(LockPath, NodeRef)>,
}

// ============================================================================
//  SessionRegistry
// ============================================================================

struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
    timeout: Duration,
}

/// Sessions by id, plus the timer that expires them.
pub(crate) struct SessionRegistry {
    inner: Mutex<Registry>,
    timer: ExpiryTimer<SessionId>,
}

impl SessionRegistry {
    pub(crate) fn new(timeout: Duration, timer: ExpiryTimer<SessionId>) -> Self {
        Self {
            inner: Mutex::new(Registry {
                sessions: HashMap::new(),
                timeout,
            }),
            timer,
        }
    }

    pub(crate) fn session_timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    /// Takes effect at each session's next (re)arming.
    pub(crate) fn set_session_timeout(&self, timeout: Duration) {
        self.inner.lock().timeout = timeout;
    }

    pub(crate) fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.lock().sessions.get(id).map(Arc::clone)
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        self.inner.lock().sessions.values().map(Arc::clone).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Get or create the session and re-arm its timer.
    ///
    /// A closing session is returned as is, without re-arming. Callers see
    /// that through [`Session::register`] failing and retry.
    pub(crate) fn touch(&self, id: &SessionId) -> Arc<Session> {
        let mut inner = self.inner.lock();
        let timeout = inner.timeout;
        let session = Arc::clone(
            inner
                .sessions
                .entry(id.clone())
                .or_insert_with(|| Session::new(id.clone())),
        );
        if !session.is_closed() {
            session.rearm(self.timer.schedule(timeout, id.clone()));
        }
        drop(inner);
        session
    }

    /// Re-arm the timer of an existing, open session.
    pub(crate) fn refresh(&self, id: &SessionId) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        let session = Arc::clone(inner.sessions.get(id)?);
        if !session.is_closed() {
            session.rearm(self.timer.schedule(inner.timeout, id.clone()));
        }
        drop(inner);
        Some(session)
    }

    /// Start closing `id`.
    ///
    /// With `fired`, only closes if that handle is still the session's
    /// current, uncancelled timer. Returns `None` if there is nothing to
    /// close or another caller is already closing it.
    pub(crate) fn begin_close(&self, id: &SessionId, fired: Option<&TimerHandle>) -> Option<Closing> {
        let inner = self.inner.lock();
        let session = inner.sessions.get(id)?;
        if fired.is_some_and(|fired| !session.timer_is(fired)) {
            trace_log!(session = %id, "stale expiry task ignored");
            return None;
        }
        let held = session.close()?;
        session.cancel_timer();
        let session = Arc::clone(session);
        drop(inner);
        Some(Closing { session, held })
    }

    /// Drop a closed session from the registry once its cascade is done.
    pub(crate) fn finish_close(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock();
        if inner
            .sessions
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            inner.sessions.remove(session.id());
        }
    }

    /// Cancel every timer and stop the worker.
    pub(crate) fn shutdown(&self) {
        let inner = self.inner.lock();
        for session in inner.sessions.values() {
            session.cancel_timer();
        }
        drop(inner);
        self.timer.shutdown();
    }
}
