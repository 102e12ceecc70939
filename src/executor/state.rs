//! Per-invocation scheduling state.
//!
//! One [`ExecuteState`] exists per concurrent `execute` call. Each node keeps
//! an atomic count of unresolved predecessors; the thread that brings a count
//! to zero owns launching that node. A node whose predecessor failed is
//! poisoned and skipped, and its completion poisons its own dependents, so
//! failure reaches every transitive dependent without executing any of them.
//!
//! Operations that complete synchronously release their first ready
//! dependent on the same thread and submit the rest to the runner. Pending
//! operations resume through a continuation on their completion event; no
//! thread ever waits.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::executor::ExecutorInner;
use crate::runtime::TaskRunner;
use crate::sync::{promise, ExecuteEvent, Promise};
use crate::thunk::ExecuteParams;
use crate::tracing_compat::{debug, error, trace};

type Ready = SmallVec<[usize; 4]>;

pub(crate) struct ExecuteState {
    executor: Arc<ExecutorInner>,
    params: ExecuteParams,
    runner: Arc<dyn TaskRunner>,
    pending: Vec<AtomicUsize>,
    poisoned: Vec<AtomicBool>,
    remaining: AtomicUsize,
    skipped: AtomicU64,
    first_error: Mutex<Option<(usize, Error)>>,
    running: Mutex<Vec<usize>>,
    done: Mutex<Option<Promise<()>>>,
}

impl ExecuteState {
    /// Submits every source node and returns the whole-sequence event.
    pub(crate) fn start(
        executor: Arc<ExecutorInner>,
        params: ExecuteParams,
        runner: Arc<dyn TaskRunner>,
    ) -> ExecuteEvent {
        let (state, event) = Self::new(executor, params, runner);
        debug!(
            operations = state.executor.graph.len(),
            sources = state.executor.graph.sources().len(),
            "executing sequence"
        );
        for &id in state.executor.graph.sources() {
            state.submit(id);
        }
        event
    }

    fn new(
        executor: Arc<ExecutorInner>,
        params: ExecuteParams,
        runner: Arc<dyn TaskRunner>,
    ) -> (Arc<Self>, ExecuteEvent) {
        let nodes = executor.graph.nodes();
        let (done, event) = promise();
        let state = Arc::new(Self {
            pending: nodes
                .iter()
                .map(|n| AtomicUsize::new(n.in_edges.len()))
                .collect(),
            poisoned: nodes.iter().map(|_| AtomicBool::new(false)).collect(),
            remaining: AtomicUsize::new(nodes.len()),
            skipped: AtomicU64::new(0),
            first_error: Mutex::new(None),
            running: Mutex::new(Vec::new()),
            done: Mutex::new(Some(done)),
            executor,
            params,
            runner,
        });
        (state, event)
    }

    fn submit(self: &Arc<Self>, id: usize) {
        let state = Arc::clone(self);
        self.runner.run(Box::new(move || state.run_from(id)));
    }

    fn run_from(self: &Arc<Self>, id: usize) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Some(failed) = self.run_node(id) else {
                break;
            };
            let mut ready = self.complete(id, failed).into_iter();
            next = ready.next();
            for other in ready {
                self.submit(other);
            }
        }
    }

    /// Launches or skips `id`. Returns whether it failed if it finished
    /// synchronously, `None` if it will finish through a continuation.
    fn run_node(self: &Arc<Self>, id: usize) -> Option<bool> {
        if self.poisoned[id].load(Ordering::Acquire) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(op = %self.executor.sequence[id].info(), "skipping dependent of failed operation");
            return Some(true);
        }
        if let Err(e) = self.enter(id) {
            self.record_error(id, e);
            return Some(true);
        }

        let event = self.executor.launch(id, &self.params);
        if event.is_available() {
            return Some(self.finish_node(id, &event));
        }
        let state = Arc::clone(self);
        let pending = event.clone();
        event.and_then(move || {
            let failed = state.finish_node(id, &pending);
            for next in state.complete(id, failed) {
                state.submit(next);
            }
        });
        None
    }

    fn finish_node(&self, id: usize, event: &ExecuteEvent) -> bool {
        self.leave(id);
        match event.error() {
            Some(e) => {
                self.record_error(id, e.clone());
                true
            }
            None => false,
        }
    }

    /// Releases the dependents of `id` and returns those that became ready.
    fn complete(&self, id: usize, failed: bool) -> Ready {
        let mut ready = Ready::new();
        for &dependent in &self.executor.graph.nodes()[id].out_edges {
            if failed {
                self.poisoned[dependent].store(true, Ordering::Release);
            }
            if self.pending[dependent].fetch_sub(1, Ordering::AcqRel) == 1 {
                ready.push(dependent);
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
        ready
    }

    fn record_error(&self, id: usize, error: Error) {
        let info = self.executor.sequence[id].info();
        let error = error.attributed_to(info);
        self.executor.stats.record_failure();
        debug!(op = %info, index = id, error = %error, "operation failed");
        let mut first = self.first_error.lock();
        if first.as_ref().map_or(true, |(index, _)| id < *index) {
            *first = Some((id, error));
        }
    }

    fn finish(&self) {
        let skipped = self.skipped.load(Ordering::Relaxed);
        self.executor.stats.record_skips(skipped);
        let outcome = self.first_error.lock().take();
        let Some(done) = self.done.lock().take() else {
            return;
        };
        match outcome {
            Some((index, e)) => {
                debug!(index, skipped, error = %e, "sequence failed");
                done.set_error(e);
            }
            None => {
                debug!("sequence completed");
                done.set(());
            }
        }
    }

    /// Marks `id` running after checking it against everything in flight.
    fn enter(&self, id: usize) -> Result<()> {
        if !self.executor.verify_footprints {
            return Ok(());
        }
        let mut running = self.running.lock();
        let graph = &self.executor.graph;
        if let Some(&other) = running.iter().find(|&&r| graph.conflicts(r, id)) {
            let a = self.executor.sequence[other].info();
            let b = self.executor.sequence[id].info();
            error!(running = %a, launching = %b, "conflicting operations scheduled concurrently");
            if cfg!(debug_assertions) {
                panic!("conflicting operations {a} and {b} scheduled concurrently");
            }
            return Err(Error::internal(format!(
                "{b} conflicts with running operation {a}"
            )));
        }
        running.push(id);
        Ok(())
    }

    fn leave(&self, id: usize) {
        if self.executor.verify_footprints {
            self.running.lock().retain(|&r| r != id);
        }
    }
}
