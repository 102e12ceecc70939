//! Seeded single-threaded task runner.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::runtime::task_runner::{Task, TaskRunner};
use crate::tracing_compat::trace;
use crate::util::DetRng;

/// Queues tasks and runs them one at a time in a seed-determined order.
///
/// Nothing runs until [`run_until_idle`](Self::run_until_idle) or
/// [`step`](Self::step) is called, so a test controls exactly when work
/// happens. Two runners with the same seed given the same submissions pick
/// the same interleaving.
pub struct LabTaskRunner {
    seed: u64,
    queue: Mutex<VecDeque<Task>>,
    rng: Mutex<DetRng>,
    executed: Mutex<u64>,
}

impl LabTaskRunner {
    /// Creates a runner with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            queue: Mutex::new(VecDeque::new()),
            rng: Mutex::new(DetRng::new(seed)),
            executed: Mutex::new(0),
        }
    }

    /// The seed this runner was created with.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Tasks run so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        *self.executed.lock()
    }

    /// Runs one randomly chosen queued task. Returns false if none was queued.
    pub fn step(&self) -> bool {
        let task = {
            let mut queue = self.queue.lock();
            if queue.is_empty() {
                return false;
            }
            let pick = self.rng.lock().next_index(queue.len());
            queue.swap_remove_back(pick)
        };
        let Some(task) = task else {
            return false;
        };
        task();
        *self.executed.lock() += 1;
        true
    }

    /// Runs tasks until the queue is empty, including tasks submitted by
    /// the tasks themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> u64 {
        let mut steps = 0;
        while self.step() {
            steps += 1;
        }
        trace!(seed = self.seed, steps, "lab runner idle");
        steps
    }
}

impl TaskRunner for LabTaskRunner {
    fn run(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for LabTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabTaskRunner")
            .field("seed", &self.seed)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record_order(seed: u64) -> Vec<u32> {
        let lab = LabTaskRunner::new(seed);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let o = Arc::clone(&order);
            lab.run(Box::new(move || o.lock().push(i)));
        }
        assert_eq!(lab.run_until_idle(), 16);
        let v = order.lock().clone();
        v
    }

    #[test]
    fn same_seed_same_interleaving() {
        assert_eq!(record_order(11), record_order(11));
    }

    #[test]
    fn nested_submissions_are_drained() {
        let lab = Arc::new(LabTaskRunner::new(3));
        let hits = Arc::new(Mutex::new(0));
        let (l, h) = (Arc::clone(&lab), Arc::clone(&hits));
        lab.run(Box::new(move || {
            let h2 = Arc::clone(&h);
            l.run(Box::new(move || *h2.lock() += 1));
            *h.lock() += 1;
        }));
        assert_eq!(lab.run_until_idle(), 2);
        assert_eq!(*hits.lock(), 2);
        assert_eq!(lab.executed(), 2);
    }
}
