//! Property-based tests for the lock manager.
//!
//! Differential testing against a flat reference model: every record lives
//! in one ordered map and each admission rule is evaluated by scanning it.
//! After every operation the manager must agree with the model on the
//! result and on every session's locks, and `verify()` must pass.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

use std::collections::{BTreeMap, BTreeSet};

use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
use proptest::prelude::*;

const SESSIONS: usize = 3;

// ============================================================================
//  Strategies
// ============================================================================

/// Short paths over a two-letter alphabet, so requests overlap often.
fn path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop_oneof![Just("a".to_string()), Just("b".to_string())], 0..=3)
}

fn lock_type() -> impl Strategy<Value = LockType> {
    prop_oneof![Just(LockType::Read), Just(LockType::Write)]
}

fn scope() -> impl Strategy<Value = LockScope> {
    prop_oneof![Just(LockScope::Shallow), Just(LockScope::Deep)]
}

#[derive(Debug, Clone)]
enum Op {
    Lock(usize, Vec<String>, LockType, LockScope),
    MultiLock(usize, Vec<Vec<String>>, LockType, LockScope),
    Release(usize, Vec<String>),
    ReleaseSession(usize),
    Rescope(usize, Vec<String>, LockType, LockScope),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    let session = 0..SESSIONS;
    prop::collection::vec(
        prop_oneof![
            6 => (session.clone(), path(), lock_type(), scope())
                .prop_map(|(s, p, t, sc)| Op::Lock(s, p, t, sc)),
            2 => (session.clone(), prop::collection::vec(path(), 1..=3), lock_type(), scope())
                .prop_map(|(s, ps, t, sc)| Op::MultiLock(s, ps, t, sc)),
            4 => (session.clone(), path()).prop_map(|(s, p)| Op::Release(s, p)),
            1 => session.clone().prop_map(Op::ReleaseSession),
            2 => (session, path(), lock_type(), scope())
                .prop_map(|(s, p, t, sc)| Op::Rescope(s, p, t, sc)),
        ],
        0..=max_ops,
    )
}

// ============================================================================
//  Reference Model
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Entry {
    lock_type: LockType,
    scope: LockScope,
    count: u32,
}

#[derive(Debug, Default)]
struct Model {
    records: BTreeMap<(usize, Vec<String>), Entry>,
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    path.starts_with(prefix)
}

fn conflicts(held: LockType, intent: LockType) -> bool {
    intent == LockType::Write || held == LockType::Write
}

impl Model {
    fn in_subtree<'a>(&'a self, path: &'a [String]) -> impl Iterator<Item = (&'a (usize, Vec<String>), &'a Entry)> {
        self.records.iter().filter(move |((_, p), _)| is_prefix(path, p))
    }

    fn foreign_deep_at(&self, session: usize, node: &[String], intent: LockType) -> bool {
        self.records.iter().any(|((s, p), e)| {
            *s != session && p.as_slice() == node && e.scope == LockScope::Deep && conflicts(e.lock_type, intent)
        })
    }

    fn lock(&mut self, session: usize, path: &[String], lock_type: LockType, scope: LockScope) -> bool {
        for depth in 0..=path.len() {
            if self.foreign_deep_at(session, &path[..depth], lock_type) {
                return false;
            }
        }

        let key = (session, path.to_vec());
        let own = self.records.get(&key).copied();
        let foreign_here = |want_write: bool| {
            self.records.iter().any(|((s, p), e)| {
                *s != session && p.as_slice() == path && (!want_write || e.lock_type == LockType::Write)
            })
        };

        let admitted = match lock_type {
            LockType::Read => {
                let writes_below = self.in_subtree(path).any(|(_, e)| e.lock_type == LockType::Write);
                !(scope == LockScope::Deep && writes_below) && !foreign_here(true)
            }
            LockType::Write => {
                let below = self.in_subtree(path).count();
                !foreign_here(false) && (scope == LockScope::Shallow || below == usize::from(own.is_some()))
            }
        };
        if !admitted {
            return false;
        }

        let count = own.map_or(1, |e| e.count + 1);
        self.records.insert(key, Entry { lock_type, scope, count });
        true
    }

    fn release(&mut self, session: usize, path: &[String]) -> bool {
        let key = (session, path.to_vec());
        let Some(entry) = self.records.get_mut(&key) else {
            return false;
        };
        entry.count -= 1;
        if entry.count == 0 {
            self.records.remove(&key);
        }
        true
    }

    fn multi_lock(&mut self, session: usize, paths: &[Vec<String>], lock_type: LockType, scope: LockScope) -> bool {
        let mut ordered: Vec<&Vec<String>> = paths.iter().collect();
        ordered.sort();
        for (taken, path) in ordered.iter().enumerate() {
            if !self.lock(session, path, lock_type, scope) {
                for earlier in &ordered[..taken] {
                    self.release(session, earlier);
                }
                return false;
            }
        }
        true
    }

    fn release_session(&mut self, session: usize) {
        self.records.retain(|(s, _), _| *s != session);
    }

    /// `None` stands for a `NotHeld` error.
    fn rescope(&mut self, session: usize, path: &[String], lock_type: LockType, scope: LockScope) -> Option<bool> {
        for depth in 0..=path.len() {
            let node = &path[..depth];
            if depth > 0 && self.in_subtree(node).next().is_none() {
                return None;
            }
            if self.foreign_deep_at(session, node, lock_type) {
                return Some(false);
            }
        }

        let below = self.in_subtree(path).count();
        let entry = self
            .records
            .get_mut(&(session, path.to_vec()))
            .filter(|e| e.lock_type == lock_type)?;
        if entry.scope == scope || (scope == LockScope::Deep && below > 1) {
            return Some(false);
        }
        entry.scope = scope;
        Some(true)
    }

    fn snapshot(&self, session: usize) -> BTreeSet<(Vec<String>, &'static str, &'static str, u32)> {
        self.records
            .iter()
            .filter(|((s, _), _)| *s == session)
            .map(|((_, p), e)| (p.clone(), e.lock_type.as_code(), e.scope.as_code(), e.count))
            .collect()
    }
}

// ============================================================================
//  Harness
// ============================================================================

fn session_id(index: usize) -> SessionId {
    SessionId::new(format!("s{index}")).unwrap()
}

fn snapshot(lm: &LockManager, session: usize) -> BTreeSet<(Vec<String>, &'static str, &'static str, u32)> {
    lm.locks(&session_id(session))
        .into_iter()
        .map(|r| {
            (
                r.path().segments().to_vec(),
                r.lock_type().as_code(),
                r.scope().as_code(),
                r.count(),
            )
        })
        .collect()
}

fn apply(lm: &LockManager, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match op {
        Op::Lock(s, path, t, sc) => {
            let got = lm.lock(&session_id(*s), &LockPath::from(path.clone()), *t, *sc);
            prop_assert_eq!(got, model.lock(*s, path, *t, *sc), "{:?}", op);
        }
        Op::MultiLock(s, paths, t, sc) => {
            let lock_paths: Vec<LockPath> = paths.iter().cloned().map(LockPath::from).collect();
            let got = lm.multi_lock(&session_id(*s), &lock_paths, *t, *sc).unwrap();
            prop_assert_eq!(got, model.multi_lock(*s, paths, *t, *sc), "{:?}", op);
        }
        Op::Release(s, path) => {
            let got = lm.release(&session_id(*s), &LockPath::from(path.clone()));
            prop_assert_eq!(got, model.release(*s, path), "{:?}", op);
        }
        Op::ReleaseSession(s) => {
            lm.release_session(&session_id(*s));
            model.release_session(*s);
        }
        Op::Rescope(s, path, t, sc) => {
            let id = session_id(*s);
            let lock_path = LockPath::from(path.clone());
            let got = match sc {
                LockScope::Deep => lm.up_scope(&id, &lock_path, *t),
                LockScope::Shallow => lm.down_scope(&id, &lock_path, *t),
            };
            prop_assert_eq!(got.ok(), model.rescope(*s, path, *t, *sc), "{:?}", op);
        }
    }
    Ok(())
}

// ============================================================================
//  Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Every result and every lock snapshot matches the model.
    #[test]
    fn manager_matches_model(ops in operations(40)) {
        let lm = LockManager::new(LockManagerConfig::default()).unwrap();
        let mut model = Model::default();

        for op in &ops {
            apply(&lm, &mut model, op)?;
            for session in 0..SESSIONS {
                prop_assert_eq!(snapshot(&lm, session), model.snapshot(session), "after {:?}", op);
            }
            if let Err(violation) = lm.verify() {
                return Err(TestCaseError::fail(format!("after {op:?}: {violation}")));
            }
        }
    }

    /// Releasing every session leaves a tree with nothing but the root.
    #[test]
    fn release_all_sessions_empties_tree(ops in operations(30)) {
        let lm = LockManager::new(LockManagerConfig::default()).unwrap();
        let mut model = Model::default();
        for op in &ops {
            apply(&lm, &mut model, op)?;
        }

        for session in 0..SESSIONS {
            lm.release_session(&session_id(session));
        }
        prop_assert_eq!(lm.session_count(), 0);
        prop_assert!(lm.verify().is_ok());

        // Root counters are back to zero, so a deep write on the root succeeds.
        prop_assert!(lm.write_lock(&session_id(0), &LockPath::root(), LockScope::Deep));
    }
}
