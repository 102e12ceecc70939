//! Buffers: footprint descriptors and the host allocation table.

pub mod allocations;
pub mod buffer_use;

pub use allocations::BufferAllocations;
pub use buffer_use::{BufferSlice, BufferUse, MemoryAccess};
