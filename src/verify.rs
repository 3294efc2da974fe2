//! Filepath: src/verify.rs
//!
//! Whole-tree consistency check.
//!
//! [`LockManager::verify`] walks the tree depth first, holding one node
//! mutex at a time, then cross-checks the records against the sessions in
//! both directions: every record must be listed by its registered session,
//! and every listed node must carry the session's record. It is
//! only meaningful while no other thread is operating on the manager; under
//! concurrent mutation it may report violations that are merely in flight.

use std::fmt as StdFmt;
use std::sync::Arc;

use crate::manager::LockManager;
use crate::node::NodeRef;
use crate::path::LockPath;
use crate::record::LockType;
use crate::session::SessionId;
use crate::tracing_helpers::error_log;

/// What went wrong at a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// An exclusive lock and shared locks coexist.
    ExclusiveWithShared,
    /// The deep set does not match the node's DEEP records.
    DeepSetMismatch,
    /// A record's path differs from its node's path.
    RecordPathMismatch {
        /// The path stored in the record.
        record_path: LockPath,
    },
    /// A record has a reentrant count of zero.
    ZeroCount {
        /// Owner of the record.
        session: SessionId,
    },
    /// A subtree counter differs from the records actually present.
    CounterMismatch {
        /// Which counter.
        lock_type: LockType,
        /// Counter value stored at the node.
        recorded: usize,
        /// Records found in the subtree.
        actual: usize,
    },
    /// A non-root node with nothing locked in its subtree is still linked.
    Unpruned,
    /// A child's parent reference does not point at its parent.
    BrokenParentLink,
    /// A session's held-node map names a node without its record.
    StaleHeldEntry {
        /// The session whose map is stale.
        session: SessionId,
    },
    /// A record whose session is not registered, or whose session does not
    /// list this node.
    OrphanedRecord {
        /// Owner named by the record.
        session: SessionId,
    },
}

/// A consistency violation found by [`LockManager::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Path of the offending node.
    pub path: LockPath,
    /// What is wrong there.
    pub kind: ViolationKind,
}

impl InvariantViolation {
    const fn new(path: LockPath, kind: ViolationKind) -> Self {
        Self { path, kind }
    }
}

impl StdFmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(f, "at /{}: ", self.path)?;
        match &self.kind {
            ViolationKind::ExclusiveWithShared => write!(f, "exclusive and shared locks coexist"),
            ViolationKind::DeepSetMismatch => write!(f, "deep set does not match deep records"),
            ViolationKind::RecordPathMismatch { record_path } => {
                write!(f, "record for /{record_path} stored here")
            }
            ViolationKind::ZeroCount { session } => {
                write!(f, "record of {session} has count 0")
            }
            ViolationKind::CounterMismatch {
                lock_type,
                recorded,
                actual,
            } => write!(
                f,
                "{lock_type} counter is {recorded} but subtree holds {actual}"
            ),
            ViolationKind::Unpruned => write!(f, "empty node not pruned"),
            ViolationKind::BrokenParentLink => write!(f, "parent link broken"),
            ViolationKind::StaleHeldEntry { session } => {
                write!(f, "{session} lists this node but holds no lock here")
            }
            ViolationKind::OrphanedRecord { session } => {
                write!(f, "record of {session} is not listed by that session")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Read and write records found in a subtree.
#[derive(Default, Clone, Copy)]
struct Tally {
    reads: usize,
    writes: usize,
}

/// A record seen during the walk, with the node it was found on.
type SeenRecord = (SessionId, LockPath, NodeRef);

/// Check one subtree, returning its record tally.
fn check_subtree(
    node_ref: &NodeRef,
    parent: Option<&NodeRef>,
    seen: &mut Vec<SeenRecord>,
) -> Result<Tally, InvariantViolation> {
    let node = node_ref.lock();
    let path = node.path().clone();
    let fail = |kind| Err(InvariantViolation::new(path.clone(), kind));

    match parent {
        Some(parent) => {
            if !node
                .parent()
                .upgrade()
                .is_some_and(|linked| Arc::ptr_eq(&linked, parent))
            {
                return fail(ViolationKind::BrokenParentLink);
            }
            if node.subtree_empty() {
                return fail(ViolationKind::Unpruned);
            }
        }
        None => debug_assert!(node.is_root()),
    }

    if node.exclusive().is_some() && node.shared().next().is_some() {
        return fail(ViolationKind::ExclusiveWithShared);
    }

    let mut tally = Tally::default();
    let mut deep_records = 0_usize;
    for record in node.records() {
        if record.path() != &path {
            return fail(ViolationKind::RecordPathMismatch {
                record_path: record.path().clone(),
            });
        }
        if record.count() == 0 {
            return fail(ViolationKind::ZeroCount {
                session: record.session().clone(),
            });
        }
        seen.push((record.session().clone(), path.clone(), Arc::clone(node_ref)));
        match record.lock_type() {
            LockType::Read => tally.reads += 1,
            LockType::Write => tally.writes += 1,
        }
        if record.is_deep() {
            deep_records += 1;
            let listed = node
                .deep_sessions()
                .any(|(session, lock_type)| session == record.session() && *lock_type == record.lock_type());
            if !listed {
                return fail(ViolationKind::DeepSetMismatch);
            }
        }
    }
    if node.deep_sessions().count() != deep_records {
        return fail(ViolationKind::DeepSetMismatch);
    }

    let recorded = (node.shared_count(), node.exclusive_count());
    let children: Vec<NodeRef> = node.children().map(|(_, child)| Arc::clone(child)).collect();
    drop(node);

    for child in &children {
        let below = check_subtree(child, Some(node_ref), seen)?;
        tally.reads += below.reads;
        tally.writes += below.writes;
    }

    if recorded.0 != tally.reads {
        return fail(ViolationKind::CounterMismatch {
            lock_type: LockType::Read,
            recorded: recorded.0,
            actual: tally.reads,
        });
    }
    if recorded.1 != tally.writes {
        return fail(ViolationKind::CounterMismatch {
            lock_type: LockType::Write,
            recorded: recorded.1,
            actual: tally.writes,
        });
    }
    Ok(tally)
}

impl LockManager {
    /// Check the consistency of the whole tree and every session.
    ///
    /// Only meaningful at quiescence. Never panics on a violation.
    ///
    /// # Errors
    ///
    /// The first [`InvariantViolation`] found.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let inner = self.inner();
        let mut seen = Vec::new();
        if let Err(violation) = check_subtree(&inner.root, None, &mut seen) {
            error_log!(%violation, "tree check failed");
            return Err(violation);
        }

        for (session, path, node) in seen {
            let listed = inner
                .registry
                .get(&session)
                .and_then(|owner| owner.held_node(&path))
                .is_some_and(|held| Arc::ptr_eq(&held, &node));
            if !listed {
                let violation = InvariantViolation::new(path, ViolationKind::OrphanedRecord { session });
                error_log!(%violation, "record check failed");
                return Err(violation);
            }
        }

        for session in inner.registry.sessions() {
            for (path, node) in session.held_nodes() {
                let node = node.lock();
                if node.path() != &path || node.record_for(session.id()).is_none() {
                    let violation = InvariantViolation::new(
                        path,
                        ViolationKind::StaleHeldEntry {
                            session: session.id().clone(),
                        },
                    );
                    error_log!(%violation, "session check failed");
                    return Err(violation);
                }
            }
        }
        Ok(())
    }
}
