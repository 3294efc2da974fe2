//! Filepath: src/expiry.rs
//!
//! Deadline queue driving session expiry.
//!
//! One background worker (`locktree-expiry`) owns a min-heap of
//! `(deadline, sequence, task)` entries and sleeps on a condition variable
//! until the earliest deadline or until new work arrives. Every scheduled
//! task has its own [`TimerHandle`]; cancelling a handle never touches the
//! heap, the worker just discards cancelled entries when they surface.
//!
//! The fire callback runs on the worker thread with the queue mutex
//! released, so it may schedule or cancel freely.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::tracing_helpers::{trace_log, warn_log};

/// Name of the worker thread.
pub const WORKER_NAME: &str = "locktree-expiry";

/// Heap size below which cancelled entries are never compacted eagerly.
const MIN_COMPACT_LEN: usize = 64;

// ============================================================================
//  TimerHandle
// ============================================================================

/// Cancellation handle for one scheduled task.
///
/// Clones share the same cancellation flag.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    seq: u64,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Prevent the task from firing. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True if `other` is a handle to the same task.
    #[must_use]
    pub fn same_task(&self, other: &Self) -> bool {
        self.seq == other.seq && Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

// ============================================================================
//  Queue
// ============================================================================

struct Entry<T> {
    deadline: Instant,
    handle: TimerHandle,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.handle.seq.cmp(&other.handle.seq))
    }
}

struct Queue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
    compact_at: usize,
    shutdown: bool,
}

impl<T> Queue<T> {
    fn drop_cancelled_head(&mut self) {
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.handle.is_cancelled())
        {
            self.heap.pop();
        }
    }

    fn compact(&mut self) {
        self.heap.retain(|Reverse(entry)| !entry.handle.is_cancelled());
        self.compact_at = (self.heap.len() * 2).max(MIN_COMPACT_LEN);
    }
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    wake: Condvar,
}

// ============================================================================
//  ExpiryTimer
// ============================================================================

/// A deadline queue of cancellable tasks carrying a `T` payload.
///
/// Cloning yields another handle to the same queue.
pub(crate) struct ExpiryTimer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ExpiryTimer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ExpiryTimer<T> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    heap: BinaryHeap::new(),
                    next_seq: 0,
                    compact_at: MIN_COMPACT_LEN,
                    shutdown: false,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    /// Schedule `payload` to fire after `delay`.
    ///
    /// After shutdown the returned handle is already cancelled.
    pub(crate) fn schedule(&self, delay: Duration, payload: T) -> TimerHandle {
        let mut queue: MutexGuard<'_, Queue<T>> = self.shared.queue.lock();
        let handle = TimerHandle::new(queue.next_seq);
        queue.next_seq += 1;

        if queue.shutdown {
            handle.cancel();
            return handle;
        }

        if queue.heap.len() >= queue.compact_at {
            queue.compact();
        }

        let deadline = Instant::now() + delay;
        let becomes_head = queue
            .heap
            .peek()
            .is_none_or(|Reverse(head)| deadline < head.deadline);

        queue.heap.push(Reverse(Entry {
            deadline,
            handle: handle.clone(),
            payload,
        }));
        drop(queue);

        if becomes_head {
            self.shared.wake.notify_one();
        }
        handle
    }

    /// Start the worker thread. `on_fire` receives each due, uncancelled
    /// payload together with its handle.
    pub(crate) fn start<F>(&self, mut on_fire: F) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(T, &TimerHandle) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || run_worker(&shared, &mut on_fire))
    }

    /// Cancel every pending task and stop the worker.
    pub(crate) fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        queue.shutdown = true;
        for Reverse(entry) in queue.heap.drain() {
            entry.handle.cancel();
        }
        drop(queue);
        self.shared.wake.notify_all();
    }

    /// Number of queued entries, cancelled ones included.
    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }
}

fn run_worker<T, F>(shared: &Shared<T>, on_fire: &mut F)
where
    F: FnMut(T, &TimerHandle),
{
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            trace_log!("expiry worker shutting down");
            return;
        }

        queue.drop_cancelled_head();

        let Some(deadline) = queue.heap.peek().map(|Reverse(head)| head.deadline) else {
            shared.wake.wait(&mut queue);
            continue;
        };

        if Instant::now() < deadline {
            let _ = shared.wake.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(Reverse(entry)) = queue.heap.pop() else {
            warn_log!("expiry heap emptied between peek and pop");
            continue;
        };

        MutexGuard::unlocked(&mut queue, || {
            if !entry.handle.is_cancelled() {
                on_fire(entry.payload, &entry.handle);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::unwrap_used)]

    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let timer: ExpiryTimer<u32> = ExpiryTimer::new();
        let (tx, rx) = mpsc::channel();
        let worker = timer.start(move |n, _| tx.send(n).unwrap()).unwrap();

        timer.schedule(Duration::from_millis(40), 3);
        timer.schedule(Duration::from_millis(10), 1);
        timer.schedule(Duration::from_millis(25), 2);

        let fired: Vec<u32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(fired, vec![1, 2, 3]);

        timer.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_cancelled_task_never_fires() {
        let timer: ExpiryTimer<&'static str> = ExpiryTimer::new();
        let (tx, rx) = mpsc::channel();
        let worker = timer.start(move |name, _| tx.send(name).unwrap()).unwrap();

        let doomed = timer.schedule(Duration::from_millis(10), "cancelled");
        doomed.cancel();
        timer.schedule(Duration::from_millis(30), "kept");

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "kept");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        timer.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_shutdown_cancels_pending() {
        let timer: ExpiryTimer<()> = ExpiryTimer::new();
        let worker = timer.start(|(), _| {}).unwrap();
        let handle = timer.schedule(Duration::from_secs(3600), ());

        timer.shutdown();
        worker.join().unwrap();

        assert!(handle.is_cancelled());
        assert!(timer.schedule(Duration::ZERO, ()).is_cancelled());
    }

    #[test]
    fn test_compaction_drops_cancelled_entries() {
        let timer: ExpiryTimer<usize> = ExpiryTimer::new();
        for n in 0..(MIN_COMPACT_LEN * 4) {
            timer.schedule(Duration::from_secs(3600), n).cancel();
        }
        assert!(timer.queued() <= MIN_COMPACT_LEN + 1);
    }

    #[test]
    fn test_handle_identity() {
        let timer: ExpiryTimer<()> = ExpiryTimer::new();
        let a = timer.schedule(Duration::from_secs(60), ());
        let b = timer.schedule(Duration::from_secs(60), ());
        assert!(a.same_task(&a.clone()));
        assert!(!a.same_task(&b));
        timer.shutdown();
    }
}

// ============================================================================
//  Loom model
// ============================================================================
