//! # Thread-Safe Queue
//!
//! A double-ended queue shared between the reactor thread (producer) and the
//! application thread (consumer).
//!
//! One mutex guards the container and one condition variable, tied to that
//! mutex, signals pushes. A waiter re-checks emptiness under the lock, so a push
//! racing with [`TsQueue::wait`] is never missed.
//!
//! ## Usage
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use tether_net::utils::tsqueue::TsQueue;
//!
//! let queue = Arc::new(TsQueue::new());
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || queue.push_back(42))
//! };
//!
//! queue.wait();
//! assert_eq!(queue.pop_front(), Some(42));
//! producer.join().unwrap();
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Blocking double-ended queue usable from any number of threads
#[derive(Debug)]
pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the VecDeque half-modified,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an item to the back and wake one waiter
    pub fn push_back(&self, item: T) {
        self.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Add an item to the front and wake one waiter
    pub fn push_front(&self, item: T) {
        self.lock().push_front(item);
        self.ready.notify_one();
    }

    /// Remove and return the front item, `None` if the queue is empty
    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove and return the back item, `None` if the queue is empty
    pub fn pop_back(&self) -> Option<T> {
        self.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Block the calling thread until the queue holds at least one item
    pub fn wait(&self) {
        let guard = self.lock();
        let _guard = self
            .ready
            .wait_while(guard, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = self
                .ready
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> TsQueue<T> {
    /// Copy of the front item
    pub fn front(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Copy of the back item
    pub fn back(&self) -> Option<T> {
        self.lock().back().cloned()
    }
}
