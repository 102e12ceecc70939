//! Per-executor counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of [`ExecutionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Whole-sequence invocations.
    pub executions: u64,
    /// Invocations that ran on the caller thread in program order.
    pub sequential_executions: u64,
    /// Operations whose execute entry point was called.
    pub launched: u64,
    /// Operations that resolved to an error.
    pub failed: u64,
    /// Operations skipped because a predecessor failed.
    pub skipped: u64,
}

/// Counters updated under a lock held only for the update.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    counters: Mutex<StatsSnapshot>,
}

impl ExecutionStats {
    pub(crate) fn record_execution(&self, sequential: bool) {
        let mut c = self.counters.lock();
        c.executions += 1;
        if sequential {
            c.sequential_executions += 1;
        }
    }

    pub(crate) fn record_launch(&self) {
        self.counters.lock().launched += 1;
    }

    pub(crate) fn record_failure(&self) {
        self.counters.lock().failed += 1;
    }

    pub(crate) fn record_skips(&self, n: u64) {
        if n > 0 {
            self.counters.lock().skipped += n;
        }
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.counters.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ExecutionStats::default();
        stats.record_execution(true);
        stats.record_execution(false);
        stats.record_launch();
        stats.record_failure();
        stats.record_skips(3);
        stats.record_skips(0);
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                executions: 2,
                sequential_executions: 1,
                launched: 1,
                failed: 1,
                skipped: 3,
            }
        );
    }
}
