//! Delivery queue between the dispatcher thread and the application.
//!
//! # Semantics
//!
//! - **Push**: Never blocks (unbounded), fails only when closed
//! - **Pop**: Blocks when empty, returns items in FIFO order
//! - **Close**: Queued items stay readable; afterwards every pop returns [`Done`]
//! - **Discard**: Close and drop queued items, the next pop returns [`Done`]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// End-of-stream marker.
///
/// Returned once the queue is closed and drained. It is sticky: a queue that
/// reported `Done` never yields an item again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done;

impl fmt::Display for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue done")
    }
}

impl std::error::Error for Done {}

/// Unbounded blocking FIFO with a close operation.
///
/// Clones share the same queue.
pub struct DeliveryQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    push_notify: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        DeliveryQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for DeliveryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeliveryQueue<T> {
    /// Create an empty open queue.
    pub fn new() -> Self {
        DeliveryQueue {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    closed: false,
                }),
                push_notify: Condvar::new(),
            }),
        }
    }

    /// Append an item. Returns it back if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        self.inner.push_notify.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty and open.
    pub fn pop(&self) -> Result<T, Done> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(Done);
            }
            self.inner.push_notify.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout` with `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, Done> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }
            if state.closed {
                return Err(Done);
            }
            if self
                .inner
                .push_notify
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.items.pop_front() {
                    Some(item) => Ok(Some(item)),
                    None if state.closed => Err(Done),
                    None => Ok(None),
                };
            }
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Result<Option<T>, Done> {
        let mut state = self.inner.state.lock();
        match state.items.pop_front() {
            Some(item) => Ok(Some(item)),
            None if state.closed => Err(Done),
            None => Ok(None),
        }
    }

    /// Close the queue and wake every blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.inner.push_notify.notify_all();
    }

    /// Close the queue and drop every queued item. Returns how many were dropped.
    pub fn discard(&self) -> usize {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let dropped = state.items.len();
        state.items.clear();
        self.inner.push_notify.notify_all();
        dropped
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Returns true if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
