//! Lock installation at the destination node.
//!
//! These run with the destination locked and its intent counter already
//! raised by the traversal. They never walk the tree themselves: when a new
//! record supersedes the session's old one, the old record's type is handed
//! back so the caller can lower its counters after unlocking.

use crate::error::LockError;
use crate::node::{NodeRef, PathNode};
use crate::path::LockPath;
use crate::record::{LockRecord, LockScope, LockType};
use crate::session::Session;
use crate::tracing_helpers::trace_log;

use super::Inner;

/// Outcome of installing a lock at a locked destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Install {
    /// Installed. `superseded` is the type of the session's previous record
    /// at this node, whose counters are still to be lowered.
    Granted { superseded: Option<LockType> },
    /// Refused by the admission rules.
    Refused,
    /// The session started closing; nothing was installed.
    SessionClosed,
}

impl Inner {
    /// Install a READ lock for `session` at `node`.
    pub(super) fn set_read_lock(
        node: &mut PathNode,
        node_ref: &NodeRef,
        session: &Session,
        path: &LockPath,
        scope: LockScope,
    ) -> Install {
        if scope == LockScope::Deep && node.exclusive_count() > 0 {
            return Install::Refused;
        }
        if node
            .exclusive()
            .is_some_and(|exclusive| exclusive.session() != session.id())
        {
            return Install::Refused;
        }
        Self::install(node, node_ref, session, path, LockType::Read, scope)
    }

    /// Install a WRITE lock for `session` at `node`.
    ///
    /// A DEEP write needs the subtree to hold nothing but this request and
    /// the session's own record here, if it has one.
    pub(super) fn set_write_lock(
        node: &mut PathNode,
        node_ref: &NodeRef,
        session: &Session,
        path: &LockPath,
        scope: LockScope,
    ) -> Install {
        if !node.can_get_exclusive_lock(session.id()) {
            return Install::Refused;
        }
        if scope == LockScope::Deep {
            let allowed = if node.record_for(session.id()).is_some() { 2 } else { 1 };
            if node.locks_in_subtree() != allowed {
                return Install::Refused;
            }
        }
        Self::install(node, node_ref, session, path, LockType::Write, scope)
    }

    fn install(
        node: &mut PathNode,
        node_ref: &NodeRef,
        session: &Session,
        path: &LockPath,
        lock_type: LockType,
        scope: LockScope,
    ) -> Install {
        if !session.register(path, node_ref) {
            return Install::SessionClosed;
        }

        let previous = node.remove_lock(session.id());
        let record = match &previous {
            Some(old) => old.reenter(lock_type, scope),
            None => LockRecord::new(session.id().clone(), path.clone(), lock_type, scope),
        };
        trace_log!(record = %record, "installed");
        node.add_lock(record);

        Install::Granted {
            superseded: previous.map(|old| old.lock_type()),
        }
    }

    /// Change the scope of the session's `lock_type` lock at `node`.
    ///
    /// Refused when the scope would not change, or when going DEEP while
    /// anything else is locked in the subtree.
    ///
    /// # Errors
    ///
    /// [`LockError::NotHeld`] if the session holds no `lock_type` lock here.
    pub(super) fn set_lock_scope(
        node: &mut PathNode,
        session: &Session,
        lock_type: LockType,
        scope: LockScope,
    ) -> Result<bool, LockError> {
        let Some(existing) = node
            .record_for(session.id())
            .filter(|record| record.lock_type() == lock_type)
            .cloned()
        else {
            return Err(LockError::NotHeld {
                session: session.id().clone(),
                path: node.path().clone(),
            });
        };

        if scope == existing.scope() || (scope == LockScope::Deep && node.locks_in_subtree() > 1) {
            return Ok(false);
        }

        node.replace_lock(existing.with_scope(scope));
        Ok(true)
    }
}
