//! Task submission.
//!
//! The executor's only concurrency primitive is a [`TaskRunner`]: something
//! that accepts a unit of deferred work and eventually runs it. Runners must
//! be re-entrant; tasks routinely submit further tasks from worker threads.

use std::fmt;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks for eventual execution, inline or on a pool.
pub trait TaskRunner: Send + Sync {
    /// Arranges for `task` to run.
    fn run(&self, task: Task);
}

impl<F> TaskRunner for F
where
    F: Fn(Task) + Send + Sync,
{
    fn run(&self, task: Task) {
        self(task);
    }
}

/// Runs every task immediately on the submitting thread.
#[derive(Clone, Copy, Default)]
pub struct InlineTaskRunner;

impl TaskRunner for InlineTaskRunner {
    fn run(&self, task: Task) {
        task();
    }
}

impl fmt::Debug for InlineTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineTaskRunner")
    }
}
