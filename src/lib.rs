//! # `locktree`
//!
//! A hierarchical, path-addressed lock manager.
//!
//! Sessions take shared (read) or exclusive (write) locks on resources named
//! by paths, sequences of string segments. A lock is either shallow (the path
//! alone) or deep (the path and everything below it). Conflicting requests
//! fail immediately; nothing ever waits for a lock.
//!
//! ## Quick Start
//!
//! ```rust
//! use locktree::{LockManager, LockManagerConfig, LockPath, LockScope, LockType, SessionId};
//!
//! let manager = LockManager::new(LockManagerConfig::default()).unwrap();
//! let s1 = SessionId::new("s1").unwrap();
//! let s2 = SessionId::new("s2").unwrap();
//!
//! // s1 takes the whole "1" subtree.
//! assert!(manager.write_lock(&s1, &LockPath::from(["1"]), LockScope::Deep));
//! assert!(!manager.read_lock(&s2, &LockPath::from(["1", "2", "3"]), LockScope::Shallow));
//!
//! assert!(manager.release(&s1, &LockPath::from(["1"])));
//! assert!(manager.read_lock(&s2, &LockPath::from(["1", "2", "3"]), LockScope::Shallow));
//!
//! // All or nothing over several paths.
//! let paths = [LockPath::from(["a"]), LockPath::from(["b"])];
//! assert_eq!(manager.multi_lock(&s1, &paths, LockType::Read, LockScope::Shallow), Ok(true));
//! ```
//!
//! ## Design
//!
//! The tree has one node per locked path (and per prefix of one). Each node
//! has its own mutex and aggregate counters of the read and write locks in
//! its subtree. Operations walk from the root with lock coupling: the child
//! is locked before the parent is released, so every thread takes node
//! mutexes in the same root-to-leaf order and single-path operations cannot
//! deadlock. Multi-path requests sort their paths first.
//!
//! A deep lock is only granted when nothing else is locked below it, and
//! every later walk through its node checks it. That keeps the deep-conflict
//! test local to each node on the way down.
//!
//! ## Sessions
//!
//! Sessions are leases. Each lock operation or heartbeat re-arms a timer;
//! when it fires the session's locks are all released. See
//! [`LockManagerConfig`] for the timeout.
//!
//! ## Features
//!
//! | Feature | Effect |
//! |---------|--------|
//! | `tracing` | Structured logging through the `tracing` crate |
//! | `mimalloc` | `mimalloc` as global allocator in the binaries |

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod manager;
pub mod path;
pub mod record;
pub mod scoped;
pub mod session;
pub mod verify;

pub(crate) mod expiry;
pub(crate) mod node;
pub(crate) mod tracing_helpers;

pub use config::LockManagerConfig;
pub use error::LockError;
pub use manager::LockManager;
pub use path::LockPath;
pub use record::{LockRecord, LockScope, LockType, Outcome};
pub use scoped::ScopedLock;
pub use session::SessionId;
pub use tracing_helpers::init_tracing;
pub use verify::{InvariantViolation, ViolationKind};
