//! Concrete operations.
//!
//! Each operation declares a footprint that covers everything it touches and
//! implements the non-blocking [`Thunk`](crate::thunk::Thunk) contract.
//! Control-flow operations ([`CallThunk`], [`ConditionalThunk`],
//! [`WhileThunk`]) own nested sequences and run them with their own
//! executors; their footprints aggregate the nested footprints.

pub mod call;
pub mod collective;
pub mod conditional;
pub mod copy;
pub mod custom_call;
pub mod id;
pub mod kernel;
pub mod rng;
pub mod while_loop;
pub mod xfeed;

pub use call::CallThunk;
pub use collective::{CollectiveOp, CollectiveOpParams, CollectiveThunk};
pub use conditional::ConditionalThunk;
pub use copy::CopyThunk;
pub use custom_call::{CustomCallFrame, CustomCallHandler, CustomCallRegistry, CustomCallThunk};
pub use id::{PartitionIdThunk, ReplicaIdThunk};
pub use kernel::{HostKernel, HostKernelRegistry, KernelCallFrame, KernelThunk, ThreadDim};
pub use rng::RngGetAndUpdateStateThunk;
pub use while_loop::WhileThunk;
pub use xfeed::{InfeedThunk, OutfeedThunk};
