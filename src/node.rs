//! Filepath: src/node.rs
//!
//! Nodes of the lock tree.
//!
//! Every node guards its state with its own [`parking_lot::Mutex`]. The
//! traversal in [`manager::traverse`](crate::manager) couples these mutexes
//! hand over hand, so node state is only ever read or written while the
//! node's own mutex is held.
//!
//! # Counters
//!
//! `shared_count` and `exclusive_count` count read and write locks in the
//! whole subtree rooted at the node, this node included. Traversal raises
//! the counter for its intent at every node it passes, before the outcome
//! at the destination is known. So while a lock request is in flight the
//! destination's counters already include it; admission checks account for
//! that.
//!
//! # Lock Slots
//!
//! ```text
//! exclusive: Option<LockRecord>      at most one WRITE record
//! shared:    SessionId -> LockRecord READ records, empty while exclusive is set
//! deep:      SessionId -> LockType   sessions whose record here is DEEP
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::path::LockPath;
use crate::record::{LockRecord, LockType};
use crate::session::SessionId;

/// Shared handle to a node.
pub(crate) type NodeRef = Arc<Mutex<PathNode>>;

/// Owned guard on a node's mutex. Outlives the borrow of the parent, which
/// is what lets traversal release a parent after locking the child.
pub(crate) type NodeGuard = ArcMutexGuard<RawMutex, PathNode>;

/// Lock the node behind `node`, returning an owned guard.
#[inline]
pub(crate) fn lock_node(node: &NodeRef) -> NodeGuard {
    Mutex::lock_arc(node)
}

// ============================================================================
//  PathNode
// ============================================================================

/// One path in the lock tree and the locks held on it.
#[derive(Debug)]
pub(crate) struct PathNode {
    path: LockPath,
    parent: Weak<Mutex<PathNode>>,
    children: HashMap<String, NodeRef>,
    exclusive: Option<LockRecord>,
    shared: HashMap<SessionId, LockRecord>,
    deep: HashMap<SessionId, LockType>,
    shared_count: usize,
    exclusive_count: usize,
}

impl PathNode {
    /// The root node.
    pub(crate) fn root() -> NodeRef {
        Arc::new(Mutex::new(Self::new(LockPath::root(), Weak::new())))
    }

    fn new(path: LockPath, parent: Weak<Mutex<Self>>) -> Self {
        Self {
            path,
            parent,
            children: HashMap::new(),
            exclusive: None,
            shared: HashMap::new(),
            deep: HashMap::new(),
            shared_count: 0,
            exclusive_count: 0,
        }
    }

    #[inline]
    pub(crate) const fn path(&self) -> &LockPath {
        &self.path
    }

    #[inline]
    pub(crate) const fn parent(&self) -> &Weak<Mutex<Self>> {
        &self.parent
    }

    #[inline]
    pub(crate) fn is_root(&self) -> bool {
        self.path.is_root()
    }

    // ========================================================================
    //  Children
    // ========================================================================

    pub(crate) fn child(&self, segment: &str) -> Option<NodeRef> {
        self.children.get(segment).map(Arc::clone)
    }

    /// The child for `segment`, created and linked if missing.
    ///
    /// `this` must be the handle of the node `self` is borrowed from; the new
    /// child keeps a weak reference to it.
    pub(crate) fn child_or_insert(&mut self, this: &NodeRef, segment: &str) -> NodeRef {
        if let Some(child) = self.children.get(segment) {
            return Arc::clone(child);
        }
        let child = Arc::new(Mutex::new(Self::new(
            self.path.child(segment),
            Arc::downgrade(this),
        )));
        self.children.insert(segment.to_string(), Arc::clone(&child));
        child
    }

    /// Unlink a child. Called with both this node and the child locked.
    pub(crate) fn remove_child(&mut self, segment: &str) -> Option<NodeRef> {
        self.children.remove(segment)
    }

    pub(crate) fn children(&self) -> impl Iterator<Item = (&String, &NodeRef)> {
        self.children.iter()
    }

    // ========================================================================
    //  Subtree counters
    // ========================================================================

    #[inline]
    pub(crate) const fn shared_count(&self) -> usize {
        self.shared_count
    }

    #[inline]
    pub(crate) const fn exclusive_count(&self) -> usize {
        self.exclusive_count
    }

    #[inline]
    pub(crate) const fn locks_in_subtree(&self) -> usize {
        self.shared_count + self.exclusive_count
    }

    #[inline]
    pub(crate) const fn subtree_empty(&self) -> bool {
        self.locks_in_subtree() == 0
    }

    /// Count one more `lock_type` lock in this subtree.
    pub(crate) const fn add_intent(&mut self, lock_type: LockType) {
        match lock_type {
            LockType::Read => self.shared_count += 1,
            LockType::Write => self.exclusive_count += 1,
        }
    }

    /// Count one `lock_type` lock fewer in this subtree.
    pub(crate) fn remove_intent(&mut self, lock_type: LockType) {
        let counter = match lock_type {
            LockType::Read => &mut self.shared_count,
            LockType::Write => &mut self.exclusive_count,
        };
        debug_assert!(*counter > 0, "counter underflow at /{}", self.path);
        *counter = counter.saturating_sub(1);
    }

    // ========================================================================
    //  Lock slots
    // ========================================================================

    /// True if another session holds a DEEP lock here that conflicts with
    /// an `intent` request passing through.
    ///
    /// A WRITE intent conflicts with any foreign deep lock. A READ intent
    /// only conflicts with a foreign deep WRITE.
    pub(crate) fn deep_conflict(&self, session: &SessionId, intent: LockType) -> bool {
        self.deep.iter().any(|(owner, held)| {
            owner != session && (intent == LockType::Write || *held == LockType::Write)
        })
    }

    /// This session's record at this node, if any.
    pub(crate) fn record_for(&self, session: &SessionId) -> Option<&LockRecord> {
        match &self.exclusive {
            Some(record) if record.session() == session => Some(record),
            Some(_) => None,
            None => self.shared.get(session),
        }
    }

    pub(crate) const fn exclusive(&self) -> Option<&LockRecord> {
        self.exclusive.as_ref()
    }

    pub(crate) fn shared(&self) -> impl Iterator<Item = &LockRecord> {
        self.shared.values()
    }

    pub(crate) fn deep_sessions(&self) -> impl Iterator<Item = (&SessionId, &LockType)> {
        self.deep.iter()
    }

    /// Every record at this node.
    pub(crate) fn records(&self) -> impl Iterator<Item = &LockRecord> {
        self.exclusive.iter().chain(self.shared.values())
    }

    /// True iff `session` may hold the exclusive lock: any exclusive lock
    /// is its own, and the only shared lock (if any) is its own.
    pub(crate) fn can_get_exclusive_lock(&self, session: &SessionId) -> bool {
        if let Some(exclusive) = &self.exclusive {
            return exclusive.session() == session;
        }
        self.shared.is_empty() || (self.shared.len() == 1 && self.shared.contains_key(session))
    }

    /// Install `record`. The session must not already hold one here.
    pub(crate) fn add_lock(&mut self, record: LockRecord) {
        debug_assert!(self.record_for(record.session()).is_none());
        debug_assert_eq!(record.path(), &self.path);

        if record.is_deep() {
            self.deep
                .insert(record.session().clone(), record.lock_type());
        }
        match record.lock_type() {
            LockType::Write => {
                debug_assert!(self.exclusive.is_none(), "exclusive lock already set");
                self.exclusive = Some(record);
            }
            LockType::Read => {
                self.shared.insert(record.session().clone(), record);
            }
        }
        self.debug_check_slots();
    }

    /// Remove and return `session`'s record, if it has one here.
    pub(crate) fn remove_lock(&mut self, session: &SessionId) -> Option<LockRecord> {
        let removed = match &self.exclusive {
            Some(record) if record.session() == session => self.exclusive.take(),
            Some(_) => None,
            None => self.shared.remove(session),
        };
        if removed.is_some() {
            self.deep.remove(session);
        }
        self.debug_check_slots();
        removed
    }

    /// Swap `session`'s record for `record` without touching counters.
    pub(crate) fn replace_lock(&mut self, record: LockRecord) -> Option<LockRecord> {
        let previous = self.remove_lock(record.session());
        self.add_lock(record);
        previous
    }

    #[inline]
    fn debug_check_slots(&self) {
        debug_assert!(
            self.exclusive.is_none() || self.shared.is_empty(),
            "exclusive and shared locks coexist at /{}",
            self.path
        );
        debug_assert!(
            self.deep.len() <= self.shared.len() + usize::from(self.exclusive.is_some()),
            "deep set larger than lock set at /{}",
            self.path
        );
    }
}
