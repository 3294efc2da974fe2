//! Filepath: src/path.rs
//!
//! Resource paths for the lock tree.
//!
//! A [`LockPath`] is an ordered sequence of string segments. The empty
//! sequence is the root resource. Paths are totally ordered segment by
//! segment, and a strict prefix sorts before every extension of it:
//!
//! ```text
//! []  <  [a]  <  [a, b]  <  [a, c]  <  [b]
//! ```
//!
//! This order is what `multi_lock` uses to linearize acquisition, so two
//! concurrent multi-path requests always take their locks in the same order.
//!
//! # Wire Form
//!
//! Bindings exchange paths as `/`-joined strings. The empty string is the
//! root. Splitting happens on every `/`, so empty segments survive a round
//! trip (`"a//b"` is three segments).

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt as StdFmt;
use std::sync::Arc;

/// Segment separator in the wire form.
pub const SEPARATOR: char = '/';

/// A path in the lock tree.
///
/// Cheap to clone: segments live in shared immutable storage.
///
/// # Example
///
/// ```rust
/// use locktree::LockPath;
///
/// let path = LockPath::new(["a", "b"]);
/// assert_eq!(path.len(), 2);
/// assert_eq!(path.to_wire(), "a/b");
/// assert!(LockPath::root() < path);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockPath {
    segments: Arc<[String]>,
}

impl LockPath {
    /// Build a path from its segments.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// The root path (no segments).
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Arc::from(Vec::<String>::new()),
        }
    }

    /// Parse the `/`-joined wire form. The empty string is the root.
    #[must_use]
    pub fn from_wire(wire: &str) -> Self {
        if wire.is_empty() {
            return Self::root();
        }
        Self::new(wire.split(SEPARATOR))
    }

    /// Render the `/`-joined wire form.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.segments.join("/")
    }

    /// The segments of this path, root first.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Alias of [`is_root`](Self::is_root), for collection-like call sites.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// The first `len` segments as a new path.
    ///
    /// `len` is clamped to the length of this path.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        let len = len.min(self.len());
        if len == self.len() {
            return self.clone();
        }
        Self::new(self.segments[..len].iter().cloned())
    }

    /// True if `self` is a (not necessarily strict) prefix of `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Extend this path by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.to_vec();
        segments.push(segment.into());
        Self {
            segments: segments.into(),
        }
    }
}

/// Canonical order: segment-wise, a strict prefix before its extensions.
pub fn compare_paths(left: &[String], right: &[String]) -> Ordering {
    for (l, r) in left.iter().zip(right) {
        match l.cmp(r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    left.len().cmp(&right.len())
}

impl Ord for LockPath {
    fn cmp(&self, other: &Self) -> Ordering {
        if Arc::ptr_eq(&self.segments, &other.segments) {
            return Ordering::Equal;
        }
        compare_paths(&self.segments, &other.segments)
    }
}

impl PartialOrd for LockPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Borrow<[String]> for LockPath {
    fn borrow(&self) -> &[String] {
        &self.segments
    }
}

impl<S: Into<String>> FromIterator<S> for LockPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<Vec<String>> for LockPath {
    fn from(segments: Vec<String>) -> Self {
        Self {
            segments: segments.into(),
        }
    }
}

impl From<&[&str]> for LockPath {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for LockPath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl StdFmt::Display for LockPath {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl StdFmt::Debug for LockPath {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_list().entries(self.segments.iter()).finish()
    }
}
