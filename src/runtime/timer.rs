//! Deadline timers.
//!
//! A single background thread owns a min-heap of deadlines and fires each
//! callback once its deadline passes. Rendezvous timeouts and slow-progress
//! warnings are scheduled here so no worker thread ever sleeps on them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::tracing_compat::error;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    cancelled: Arc<AtomicBool>,
    callback: Callback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

/// Shared timer thread.
pub struct TimerService {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Cancels a scheduled callback. Dropping the handle does not cancel.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Prevents the callback from running if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    /// Returns true if [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl TimerService {
    /// The process-wide timer, started on first use.
    ///
    /// If the timer thread cannot be spawned, callbacks are never fired and
    /// an error is logged once.
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: OnceLock<Arc<TimerService>> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let service = Arc::new(Self {
                state: Mutex::new(TimerState::default()),
                wakeup: Condvar::new(),
            });
            let worker = Arc::clone(&service);
            if let Err(e) = thread::Builder::new()
                .name("thunkrt-timer".to_string())
                .spawn(move || worker.run())
            {
                error!(error = %e, "failed to start timer thread");
            }
            service
        })
    }

    /// Runs `callback` on the timer thread after `delay`.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.heap.push(TimerEntry {
            deadline,
            generation,
            cancelled: Arc::clone(&cancelled),
            callback: Box::new(callback),
        });
        drop(state);
        self.wakeup.notify_one();
        TimerHandle { cancelled }
    }

    /// Number of timers not yet fired or discarded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns true if no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            let now = Instant::now();
            let mut expired = Vec::new();
            while state.heap.peek().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = state.heap.pop() {
                    expired.push(entry);
                }
            }
            if !expired.is_empty() {
                drop(state);
                for entry in expired {
                    if !entry.cancelled.load(AtomicOrdering::Acquire) {
                        (entry.callback)();
                    }
                }
                state = self.state.lock();
                continue;
            }
            match state.heap.peek().map(|e| e.deadline) {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.len())
            .finish()
    }
}
