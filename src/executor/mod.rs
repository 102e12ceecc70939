//! Concurrent, dependency-safe execution of a [`ThunkSequence`].
//!
//! [`ThunkExecutor`] builds an [`ExecutionGraph`] from the operations'
//! declared footprints once, at construction, and reuses it for every
//! invocation. Each call to [`ThunkExecutor::execute`] returns immediately
//! with an [`ExecuteEvent`] for the whole sequence.
//!
//! # Scheduling
//!
//! With a task runner in the execute params, operations with no unresolved
//! predecessors are submitted to the runner; completion of an operation
//! releases its dependents. Operations with disjoint footprints may run in
//! any order, including at the same time. Nothing waits on a thread:
//! pending operations resume the schedule through continuations.
//!
//! Without a runner, or when the graph is a single chain, operations run in
//! program order on the calling thread, again resuming through a
//! continuation when an operation returns a pending event.
//!
//! # Failure
//!
//! A failed operation's dependents are skipped, never executed. Unrelated
//! operations still run so that the sequence drains. The sequence event
//! resolves to the error of the failing operation earliest in program order,
//! attributed to that operation. A panicking operation counts as failed.
//!
//! # Footprint verification
//!
//! When enabled, every launch is checked against the operations currently
//! running. A conflict means the scheduler itself is broken: it panics in
//! debug builds and is logged and reported as an
//! [`ErrorKind::InternalInvariantViolation`](crate::ErrorKind) otherwise.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::Error;
use crate::runtime::ExecutorConfig;
use crate::sync::{promise, ExecuteEvent, Promise};
use crate::thunk::{ExecuteParams, ThunkSequence};
use crate::tracing_compat::{debug, trace};

pub mod graph;
mod state;
pub mod stats;

pub use graph::{ExecutionGraph, Node};
pub use stats::{ExecutionStats, StatsSnapshot};

use state::ExecuteState;

pub(crate) struct ExecutorInner {
    sequence: ThunkSequence,
    graph: ExecutionGraph,
    verify_footprints: bool,
    stats: ExecutionStats,
}

impl ExecutorInner {
    /// Calls the execute entry point of operation `index`.
    fn launch(&self, index: usize, params: &ExecuteParams) -> ExecuteEvent {
        let thunk = &self.sequence[index];
        trace!(op = %thunk.info(), kind = %thunk.kind(), index, "launching operation");
        self.stats.record_launch();
        match panic::catch_unwind(AssertUnwindSafe(|| thunk.execute(params))) {
            Ok(event) => event,
            Err(payload) => ExecuteEvent::failed(Error::execution(format!(
                "operation panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn run_sequential(self: &Arc<Self>, params: &ExecuteParams) -> ExecuteEvent {
        for index in 0..self.sequence.len() {
            let event = self.launch(index, params);
            if !event.is_available() {
                let (done, result) = promise();
                Arc::clone(self).resume_after(event, index, params.clone(), done);
                return result;
            }
            if let Some(e) = event.error() {
                return ExecuteEvent::failed(self.sequential_failure(index, e));
            }
        }
        ExecuteEvent::ok()
    }

    /// Continues the sequence into `done` once `pending`, the event of
    /// operation `index`, resolves.
    fn resume_after(
        self: Arc<Self>,
        pending: ExecuteEvent,
        index: usize,
        params: ExecuteParams,
        done: Promise<()>,
    ) {
        let source = pending.clone();
        pending.and_then(move || match source.error() {
            Some(e) => done.set_error(self.sequential_failure(index, e)),
            None => self.resume(index + 1, params, done),
        });
    }

    fn resume(self: Arc<Self>, start: usize, params: ExecuteParams, done: Promise<()>) {
        for index in start..self.sequence.len() {
            let event = self.launch(index, &params);
            if !event.is_available() {
                return self.resume_after(event, index, params, done);
            }
            if let Some(e) = event.error() {
                return done.set_error(self.sequential_failure(index, e));
            }
        }
        done.set(());
    }

    fn sequential_failure(&self, index: usize, error: &Error) -> Error {
        let info = self.sequence[index].info();
        let error = error.clone().attributed_to(info);
        let skipped = self.sequence.len() - index - 1;
        self.stats.record_failure();
        self.stats.record_skips(skipped as u64);
        debug!(op = %info, index, skipped, error = %error, "sequential execution failed");
        error
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Executes a sequence, concurrently where footprints allow.
///
/// Cloning is cheap and shares the sequence, graph and statistics.
#[derive(Clone)]
pub struct ThunkExecutor {
    inner: Arc<ExecutorInner>,
}

impl ThunkExecutor {
    /// An executor with the default configuration.
    #[must_use]
    pub fn new(sequence: ThunkSequence) -> Self {
        Self::with_config(sequence, &ExecutorConfig::default())
    }

    /// An executor honoring `config`'s graph and verification settings.
    #[must_use]
    pub fn with_config(sequence: ThunkSequence, config: &ExecutorConfig) -> Self {
        let graph = ExecutionGraph::new(&sequence, config.transitive_reduction);
        trace!(
            operations = graph.len(),
            edges = graph.edge_count(),
            sequential = graph.is_sequential(),
            "built execution graph"
        );
        Self {
            inner: Arc::new(ExecutorInner {
                sequence,
                graph,
                verify_footprints: config.verify_footprints,
                stats: ExecutionStats::default(),
            }),
        }
    }

    /// The executed sequence.
    #[must_use]
    pub fn sequence(&self) -> &ThunkSequence {
        &self.inner.sequence
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &ExecutionGraph {
        &self.inner.graph
    }

    /// Whether launches are checked against the operations in flight.
    #[must_use]
    pub fn verifies_footprints(&self) -> bool {
        self.inner.verify_footprints
    }

    /// Counters accumulated over every invocation.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Launches the whole sequence and returns its completion event.
    ///
    /// An empty sequence completes immediately and never touches the task
    /// runner.
    pub fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        if self.inner.sequence.is_empty() {
            return ExecuteEvent::ok();
        }
        match params.task_runner() {
            Some(runner) if !self.inner.graph.is_sequential() => {
                self.inner.stats.record_execution(false);
                ExecuteState::start(Arc::clone(&self.inner), params.clone(), Arc::clone(runner))
            }
            _ => {
                self.inner.stats.record_execution(true);
                self.inner.run_sequential(params)
            }
        }
    }
}

impl fmt::Debug for ThunkExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkExecutor")
            .field("sequence", &self.inner.sequence)
            .field("edges", &self.inner.graph.edge_count())
            .field("verify_footprints", &self.inner.verify_footprints)
            .finish_non_exhaustive()
    }
}
