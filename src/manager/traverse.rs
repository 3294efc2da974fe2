//! Root-to-leaf walks with lock coupling.
//!
//! Every walk starts at the root and only ever moves down, locking the child
//! before letting go of the parent. All walks therefore acquire node mutexes
//! in one global order, and no walk ever observes a node in between two
//! states of its parent.
//!
//! ```text
//!   lock(root)
//!   lock(a)      unlock(root)
//!   lock(a/b)    unlock(a)
//!   ...          destination stays locked
//! ```

use std::sync::Arc;

use crate::node::{NodeGuard, NodeRef, lock_node};
use crate::path::LockPath;
use crate::record::LockType;
use crate::session::SessionId;
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

use super::Inner;

/// Why a walk to an existing node stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WalkStop {
    /// Another session holds a conflicting deep lock on the way.
    Conflict,
    /// Some prefix of the path has no node.
    Missing,
}

impl Inner {
    /// Walk to `path` on behalf of a new `intent` lock, creating missing
    /// nodes and raising the `intent` counter at every node passed.
    ///
    /// Returns the destination and its guard, with its counter already raised.
    /// On a deep conflict every counter raised so far is rolled back and
    /// `None` is returned.
    pub(super) fn acquire_path(
        &self,
        session: &SessionId,
        path: &LockPath,
        intent: LockType,
    ) -> Option<(NodeRef, NodeGuard)> {
        let mut current_ref: NodeRef = Arc::clone(&self.root);
        let mut current: NodeGuard = lock_node(&current_ref);
        if current.deep_conflict(session, intent) {
            debug_log!(session = %session, "deep conflict at root");
            return None;
        }
        current.add_intent(intent);

        for (depth, segment) in path.segments().iter().enumerate() {
            let child: NodeRef = current.child_or_insert(&current_ref, segment);
            let mut next: NodeGuard = lock_node(&child);
            drop(current);
            current_ref = child;

            if next.deep_conflict(session, intent) {
                debug_log!(session = %session, at = %next.path(), "deep conflict");
                drop(next);
                // Nodes 0..=depth were raised: the root and path[..depth].
                self.release_path(&path.prefix(depth), intent);
                return None;
            }
            next.add_intent(intent);
            current = next;
        }

        trace_log!(session = %session, path = %path, ?intent, "reached destination");
        Some((current_ref, current))
    }

    /// Lower the `lock_type` counter at every node from the root to `path`,
    /// pruning the first node whose subtree becomes empty.
    ///
    /// A pruned node takes its (equally empty) descendants with it, so the
    /// walk stops there.
    pub(super) fn release_path(&self, path: &LockPath, lock_type: LockType) {
        let mut current: NodeGuard = lock_node(&self.root);
        current.remove_intent(lock_type);

        for segment in path.segments() {
            let Some(child) = current.child(segment) else {
                warn_log!(path = %path, at = %current.path(), "counter walk hit a missing node");
                return;
            };
            let mut next: NodeGuard = lock_node(&child);
            next.remove_intent(lock_type);

            if next.subtree_empty() {
                trace_log!(at = %next.path(), "pruning empty node");
                current.remove_child(segment);
                return;
            }
            drop(current);
            current = next;
        }
    }

    /// Walk to the node at `path` without changing anything.
    pub(super) fn find_existing(&self, path: &LockPath) -> Option<NodeGuard> {
        let mut current: NodeGuard = lock_node(&self.root);
        for segment in path.segments() {
            let child = current.child(segment)?;
            let next: NodeGuard = lock_node(&child);
            drop(current);
            current = next;
        }
        Some(current)
    }

    /// Walk to the existing node at `path` without changing counters,
    /// stopping at any deep lock that conflicts with `intent`.
    pub(super) fn find_existing_checked(
        &self,
        session: &SessionId,
        path: &LockPath,
        intent: LockType,
    ) -> Result<NodeGuard, WalkStop> {
        let mut current: NodeGuard = lock_node(&self.root);
        if current.deep_conflict(session, intent) {
            return Err(WalkStop::Conflict);
        }
        for segment in path.segments() {
            let child = current.child(segment).ok_or(WalkStop::Missing)?;
            let next: NodeGuard = lock_node(&child);
            drop(current);
            if next.deep_conflict(session, intent) {
                return Err(WalkStop::Conflict);
            }
            current = next;
        }
        Ok(current)
    }
}
