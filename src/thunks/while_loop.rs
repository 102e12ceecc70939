//! While loops over nested condition and body sequences.
//!
//! The loop never blocks a thread: each iteration continues from the
//! completion of the previous step, so a condition or body that returns a
//! pending event (a collective, an infeed) simply resumes the loop later on
//! whichever thread resolves it.

use std::sync::Arc;

use crate::buffer::{BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::executor::ThunkExecutor;
use crate::runtime::ExecutorConfig;
use crate::sync::{promise, ExecuteEvent, Promise};
use crate::thunk::{
    BufferUses, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind, ThunkSequence,
};

/// Runs `body` while the `Pred` written by `condition` is true.
///
/// With a known trip count the condition sequence is skipped and the body
/// runs exactly that many times.
#[derive(Debug)]
pub struct WhileThunk {
    info: ThunkInfo,
    predicate: BufferSlice,
    condition: ThunkExecutor,
    body: ThunkExecutor,
    trip_count: Option<u64>,
}

impl WhileThunk {
    /// `predicate` must be a single byte written by `condition`.
    pub fn new(
        info: ThunkInfo,
        predicate: BufferSlice,
        condition: ThunkSequence,
        body: ThunkSequence,
        trip_count: Option<u64>,
    ) -> Result<Self> {
        Self::with_config(
            info,
            predicate,
            condition,
            body,
            trip_count,
            &ExecutorConfig::default(),
        )
    }

    /// Like [`WhileThunk::new`], building the condition and body executors
    /// from `config`.
    pub fn with_config(
        info: ThunkInfo,
        predicate: BufferSlice,
        condition: ThunkSequence,
        body: ThunkSequence,
        trip_count: Option<u64>,
        config: &ExecutorConfig,
    ) -> Result<Self> {
        if predicate.size != 1 {
            return Err(Error::invalid_argument(format!(
                "loop predicate {predicate:?} is not a single pred"
            )));
        }
        Ok(Self {
            info,
            predicate,
            condition: ThunkExecutor::with_config(condition, config),
            body: ThunkExecutor::with_config(body, config),
            trip_count,
        })
    }

    /// Known trip count, if any.
    #[must_use]
    pub const fn trip_count(&self) -> Option<u64> {
        self.trip_count
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Condition,
    Body,
}

struct LoopState {
    predicate: BufferSlice,
    condition: ThunkExecutor,
    body: ThunkExecutor,
    trip_count: Option<u64>,
    params: ExecuteParams,
}

impl LoopState {
    fn run(self: Arc<Self>, mut iteration: u64, mut step: Step, done: Promise<()>) {
        loop {
            let event = match (step, self.trip_count) {
                (Step::Condition, Some(n)) if iteration >= n => return done.set(()),
                (Step::Condition, Some(_)) => {
                    step = Step::Body;
                    continue;
                }
                (Step::Condition, None) => self.condition.execute(&self.params),
                (Step::Body, _) => self.body.execute(&self.params),
            };

            if !event.is_available() {
                let this = Arc::clone(&self);
                let pending = event.clone();
                event.and_then(move || {
                    if let Some(e) = pending.error() {
                        return done.set_error(e.clone());
                    }
                    match this.next(iteration, step) {
                        Ok(Some((i, s))) => this.run(i, s, done),
                        Ok(None) => done.set(()),
                        Err(e) => done.set_error(e),
                    }
                });
                return;
            }
            if let Some(e) = event.error() {
                return done.set_error(e.clone());
            }
            match self.next(iteration, step) {
                Ok(Some((i, s))) => {
                    iteration = i;
                    step = s;
                }
                Ok(None) => return done.set(()),
                Err(e) => return done.set_error(e),
            }
        }
    }

    /// Where to go after `step` of `iteration` completed; `None` exits.
    fn next(&self, iteration: u64, step: Step) -> Result<Option<(u64, Step)>> {
        match step {
            Step::Condition => {
                let pred = self.params.buffer_allocations().read(self.predicate)?;
                Ok(pred
                    .first()
                    .is_some_and(|b| *b != 0)
                    .then_some((iteration, Step::Body)))
            }
            Step::Body => Ok(Some((iteration + 1, Step::Condition))),
        }
    }
}

impl Thunk for WhileThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::While
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        let mut uses = BufferUses::new();
        uses.push(BufferUse::read(self.predicate));
        uses.extend(self.condition.sequence().buffer_uses());
        uses.extend(self.body.sequence().buffer_uses());
        uses
    }

    fn resource_uses(&self) -> ResourceUses {
        let mut uses = self.condition.sequence().resource_uses();
        uses.extend(self.body.sequence().resource_uses());
        uses
    }

    fn nested_sequences(&self) -> Vec<&ThunkSequence> {
        vec![self.condition.sequence(), self.body.sequence()]
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        let (done, event) = promise();
        let state = Arc::new(LoopState {
            predicate: self.predicate,
            condition: self.condition.clone(),
            body: self.body.clone(),
            trip_count: self.trip_count,
            params: params.clone(),
        });
        state.run(0, Step::Condition, done);
        event
    }
}
