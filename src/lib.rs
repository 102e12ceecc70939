//! thunkrt: dependency-safe concurrent execution of compiled thunk sequences.
//!
//! # Overview
//!
//! A compiled program is a [`ThunkSequence`]: an ordered list of operations
//! ("thunks") that read and write slices of a shared buffer arena and a few
//! shared resources. Each operation declares that footprint up front. The
//! [`ThunkExecutor`] derives a dependency graph from the footprints and runs
//! the sequence as concurrently as the graph allows, with the same observable
//! result as running it in program order.
//!
//! # Core Guarantees
//!
//! - **Program-order semantics**: conflicting operations never overlap and
//!   always run in program order
//! - **Non-blocking completion**: every operation returns an [`ExecuteEvent`]
//!   immediately; pending work resumes through continuations
//! - **Failure containment**: dependents of a failed operation are skipped,
//!   independent work drains, and the earliest failure is reported
//! - **Deterministic testing**: the lab task runner replays an interleaving
//!   from a seed
//!
//! # Module Structure
//!
//! - [`buffer`]: Buffer slices, access modes and the allocation table
//! - [`resource`]: Shared non-buffer resources and their uses
//! - [`sync`]: Write-once async values and promises
//! - [`thunk`]: The operation trait, sequences and execution parameters
//! - [`thunks`]: Concrete operations (copy, kernels, control flow, collectives)
//! - [`executor`]: Dependency graph and concurrent scheduling
//! - [`collective`]: Device assignment, rendezvous and collective transports
//! - [`runtime`]: Task runners, the worker pool, timers and configuration
//! - [`lab`]: Deterministic task runner for testing
//! - [`device`]: Streams, device memory allocators and FFI context
//! - [`xfeed`]: Host infeed and outfeed queues
//! - [`types`]: Identifiers and element types
//! - [`util`]: Internal utilities (deterministic RNG)
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod buffer;
pub mod collective;
pub mod device;
pub mod error;
pub mod executor;
pub mod lab;
pub mod resource;
pub mod runtime;
pub mod sync;
pub mod thunk;
pub mod thunks;
pub mod tracing_compat;
pub mod types;
pub mod util;
pub mod xfeed;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

// Re-exports for convenient access to core types
pub use buffer::{BufferAllocations, BufferSlice, BufferUse, MemoryAccess};
pub use collective::{CollectivesInterface, DeviceAssignment, InProcessCollectives};
pub use error::{Error, ErrorContext, ErrorKind, Recoverability, Result, ResultExt};
pub use executor::{ExecutionGraph, StatsSnapshot, ThunkExecutor};
pub use lab::LabTaskRunner;
pub use resource::{Resource, ResourceKind, ResourceUse};
pub use runtime::{ExecutorConfig, InlineTaskRunner, TaskRunner, WorkerPool};
pub use sync::{promise, AsyncValue, ExecuteEvent, Promise};
pub use thunk::{ExecuteParams, RunOptions, Thunk, ThunkInfo, ThunkKind, ThunkSequence};
pub use types::{GlobalDeviceId, PrimitiveType, ReductionKind, RunId};
pub use xfeed::XfeedManager;
