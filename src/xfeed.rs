//! Infeed and outfeed queues.
//!
//! Host code and operations exchange byte buffers through a pair of FIFO
//! queues. Dequeue never blocks: it returns an [`AsyncValue`] that resolves
//! when a buffer is available.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::sync::{promise, AsyncValue, Promise};

#[derive(Default)]
struct QueueState {
    buffers: VecDeque<Vec<u8>>,
    waiters: VecDeque<Promise<Vec<u8>>>,
}

/// A FIFO of byte buffers with asynchronous dequeue.
#[derive(Default)]
pub struct XfeedQueue {
    state: Mutex<QueueState>,
}

impl XfeedQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a buffer, handing it straight to the oldest waiter if any.
    pub fn enqueue(&self, buffer: Vec<u8>) {
        let waiter = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(w) => w,
                None => {
                    state.buffers.push_back(buffer);
                    return;
                }
            }
        };
        waiter.set(buffer);
    }

    /// Takes the oldest buffer, now or once one is enqueued.
    #[must_use]
    pub fn dequeue(&self) -> AsyncValue<Vec<u8>> {
        let mut state = self.state.lock();
        if let Some(buffer) = state.buffers.pop_front() {
            return AsyncValue::ready(buffer);
        }
        let (p, value) = promise();
        state.waiters.push_back(p);
        value
    }

    /// Buffers waiting to be dequeued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Returns true if no buffer is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dequeue requests not yet satisfied.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl fmt::Debug for XfeedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("XfeedQueue")
            .field("buffers", &state.buffers.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// The infeed/outfeed pair for one device.
#[derive(Debug, Default)]
pub struct XfeedManager {
    infeed: XfeedQueue,
    outfeed: XfeedQueue,
}

impl XfeedManager {
    /// Empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host to device.
    #[must_use]
    pub fn infeed(&self) -> &XfeedQueue {
        &self.infeed
    }

    /// Device to host.
    #[must_use]
    pub fn outfeed(&self) -> &XfeedQueue {
        &self.outfeed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_before_enqueue_resolves_later() {
        let q = XfeedQueue::new();
        let first = q.dequeue();
        let second = q.dequeue();
        assert!(!first.is_available());
        assert_eq!(q.pending_requests(), 2);
        q.enqueue(vec![1]);
        q.enqueue(vec![2]);
        assert_eq!(first.value(), Some(&vec![1]));
        assert_eq!(second.value(), Some(&vec![2]));
        assert!(q.is_empty());
    }

    #[test]
    fn fifo_order() {
        let q = XfeedQueue::new();
        q.enqueue(vec![1]);
        q.enqueue(vec![2]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dequeue().value(), Some(&vec![1]));
        assert_eq!(q.dequeue().value(), Some(&vec![2]));
    }
}
