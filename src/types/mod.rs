//! Core value types shared across the runtime.
//!
//! - [`RunId`] and [`GlobalDeviceId`]: identifiers for concurrent invocations
//!   and devices
//! - [`PrimitiveType`] and [`ReductionKind`]: element types and reductions
//!   understood by collective operations

pub mod id;
pub mod primitive;

pub use id::{GlobalDeviceId, RunId};
pub use primitive::{PrimitiveType, ReductionKind};
