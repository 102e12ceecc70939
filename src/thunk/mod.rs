//! The operation abstraction.
//!
//! A [`Thunk`] is one schedulable unit of compiled work. It declares what it
//! touches ([`buffer_uses`](Thunk::buffer_uses) and
//! [`resource_uses`](Thunk::resource_uses)) and exposes a non-blocking
//! [`execute`](Thunk::execute) entry point that returns an [`ExecuteEvent`].
//! The executor derives all ordering from the declared footprints, so a
//! footprint must cover everything the operation, and anything it
//! transitively triggers, reads or writes.
//!
//! Thunks may be executed concurrently from different threads for different
//! run ids and devices. For partitioned programs all local participants run
//! simultaneously and coordinate through rendezvous.

use core::fmt;

use smallvec::SmallVec;

use crate::buffer::BufferUse;
use crate::resource::ResourceUse;
use crate::sync::ExecuteEvent;

pub mod params;
pub mod run_options;
pub mod sequence;

pub use params::{
    CollectiveExecuteParams, CustomCallExecuteParams, ExecuteParams, ExecuteParamsBuilder,
    HostKernels,
};
pub use run_options::RunOptions;
pub use sequence::ThunkSequence;

/// Buffer footprint; almost always four entries or fewer.
pub type BufferUses = SmallVec<[BufferUse; 4]>;

/// Resource footprint; empty for most operations.
pub type ResourceUses = SmallVec<[ResourceUse; 4]>;

/// Closed set of operation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkKind {
    /// All-gather collective.
    AllGather,
    /// All-reduce collective.
    AllReduce,
    /// All-to-all collective.
    AllToAll,
    /// Call into a nested sequence.
    Call,
    /// Collective permute.
    CollectivePermute,
    /// Buffer copy.
    Copy,
    /// Conditional over nested branch sequences.
    Conditional,
    /// Convolution library call.
    Convolution,
    /// Custom call into a registered handler.
    CustomCall,
    /// Dot product library call.
    Dot,
    /// FFT library call.
    Fft,
    /// Infeed.
    Infeed,
    /// Host kernel launch.
    Kernel,
    /// Outfeed.
    Outfeed,
    /// Writes the partition id.
    PartitionId,
    /// Reduce-scatter collective.
    ReduceScatter,
    /// Writes the replica id.
    ReplicaId,
    /// Reads and advances the RNG state.
    RngGetAndUpdateState,
    /// While loop over nested condition and body sequences.
    While,
}

impl ThunkKind {
    /// Stable name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllGather => "all-gather",
            Self::AllReduce => "all-reduce",
            Self::AllToAll => "all-to-all",
            Self::Call => "call",
            Self::CollectivePermute => "collective-permute",
            Self::Copy => "copy",
            Self::Conditional => "conditional",
            Self::Convolution => "convolution",
            Self::CustomCall => "custom-call",
            Self::Dot => "dot",
            Self::Fft => "fft",
            Self::Infeed => "infeed",
            Self::Kernel => "kernel",
            Self::Outfeed => "outfeed",
            Self::PartitionId => "partition-id",
            Self::ReduceScatter => "reduce-scatter",
            Self::ReplicaId => "replica-id",
            Self::RngGetAndUpdateState => "rng-get-and-update-state",
            Self::While => "while",
        }
    }

    /// Kinds that synchronize with other participants through rendezvous.
    #[must_use]
    pub const fn is_collective(self) -> bool {
        matches!(
            self,
            Self::AllGather
                | Self::AllReduce
                | Self::AllToAll
                | Self::CollectivePermute
                | Self::ReduceScatter
        )
    }

    /// Kinds that need collective execution parameters at run time.
    #[must_use]
    pub const fn needs_collective_params(self) -> bool {
        self.is_collective() || matches!(self, Self::ReplicaId | Self::PartitionId)
    }
}

impl fmt::Display for ThunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity metadata for diagnostics. Has no effect on scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ThunkInfo {
    /// Operation name.
    pub op_name: String,
    /// Owning module name.
    pub module_name: String,
    /// Owning module id.
    pub module_id: i64,
}

impl ThunkInfo {
    /// Info for an operation outside any named module.
    #[must_use]
    pub fn new(op_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            module_name: String::new(),
            module_id: 0,
        }
    }

    /// Sets the owning module.
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, id: i64) -> Self {
        self.module_name = name.into();
        self.module_id = id;
        self
    }
}

impl fmt::Display for ThunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module_name.is_empty() {
            f.write_str(&self.op_name)
        } else {
            write!(f, "{}/{}#{}", self.module_name, self.op_name, self.module_id)
        }
    }
}

/// One unit of compiled work.
pub trait Thunk: Send + Sync + fmt::Debug {
    /// Operation category, fixed at construction.
    fn kind(&self) -> ThunkKind;

    /// Identity metadata.
    fn info(&self) -> &ThunkInfo;

    /// Every buffer slice this operation reads or writes.
    fn buffer_uses(&self) -> BufferUses;

    /// Shared non-buffer resources this operation touches.
    fn resource_uses(&self) -> ResourceUses {
        ResourceUses::new()
    }

    /// Sequences this operation runs internally (branches, loop bodies).
    ///
    /// Only used to discover which execution parameters a program needs;
    /// the outer executor never schedules these directly.
    fn nested_sequences(&self) -> Vec<&ThunkSequence> {
        Vec::new()
    }

    /// Launches the work and returns immediately.
    ///
    /// Must never block on work it submits to the pool it runs on. Failures
    /// are reported through the returned event, never by panicking.
    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent;
}
