//! Fixed-capacity FIFO buffer with all-or-nothing batch admission.
//!
//! The occupancy check and the append happen under one lock, so concurrent
//! callers can never push the queue above its capacity and a rejected batch
//! never leaves a partial trace. Admission never waits for space.
//!
//! Consumers suspend on [`EventQueue::dequeue_one`] until an item arrives
//! or the queue is closed and fully drained.

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::{Batch, Event};

/// Queue size used when none is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Accepted(usize),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `queued + incoming` would exceed `capacity`.
    Full {
        queued: usize,
        capacity: usize,
        incoming: usize,
    },
    /// The queue no longer admits work (shutdown in progress).
    Closed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Full {
                queued,
                capacity,
                incoming,
            } => write!(
                f,
                "queue full: {queued}/{capacity} queued, batch of {incoming} does not fit"
            ),
            RejectReason::Closed => write!(f, "queue closed: shutting down"),
        }
    }
}

/// Cheaply clonable handle to a shared bounded queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    state: Mutex<State>,
    item_available: Notify,
}

struct State {
    items: VecDeque<Event>,
    closed: bool,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EventQueue")
            .field("capacity", &self.inner.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl EventQueue {
    /// Creates an open, empty queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                capacity,
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                    closed: false,
                }),
                item_available: Notify::new(),
            }),
        }
    }

    /// Admits the whole batch or nothing of it.
    pub fn submit(&self, batch: Batch) -> AdmissionVerdict {
        let incoming = batch.len();

        {
            let mut state = self.inner.state.lock();

            if state.closed {
                return AdmissionVerdict::Rejected(RejectReason::Closed);
            }

            let queued = state.items.len();
            if incoming > self.inner.capacity - queued {
                return AdmissionVerdict::Rejected(RejectReason::Full {
                    queued,
                    capacity: self.inner.capacity,
                    incoming,
                });
            }

            state.items.extend(batch);
        }

        for _ in 0..incoming {
            self.inner.item_available.notify_one();
        }

        AdmissionVerdict::Accepted(incoming)
    }

    /// Pops the oldest event, suspending while the queue is empty.
    ///
    /// Returns `None` only once the queue is closed and empty.
    pub async fn dequeue_one(&self) -> Option<Event> {
        loop {
            let notified = self.inner.item_available.notified();
            tokio::pin!(notified);
            // register interest before inspecting the state,
            // so a push between check and await is not missed
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn try_dequeue(&self) -> Option<Event> {
        self.inner.state.lock().items.pop_front()
    }

    /// Stops admission and wakes every suspended consumer.
    ///
    /// Already queued events remain available to consumers.
    pub fn close(&self) {
        let was_closed = std::mem::replace(&mut self.inner.state.lock().closed, true);
        if !was_closed {
            self.inner.item_available.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests;
