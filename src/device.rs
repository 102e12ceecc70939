//! Device-side context handed to custom calls: streams, allocators and the
//! foreign-function execution context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// An ordered queue of device work. On the host it only carries identity.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Stream {
    id: u64,
    device_ordinal: i32,
}

impl Stream {
    /// Creates a stream bound to `device_ordinal`.
    #[must_use]
    pub fn new(device_ordinal: i32) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            device_ordinal,
        }
    }

    /// Unique stream id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Device the stream belongs to.
    #[must_use]
    pub const fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }
}

/// Memory handed out by a [`DeviceMemoryAllocator`].
#[derive(Debug)]
pub struct DeviceMemory {
    device_ordinal: i32,
    bytes: Box<[u8]>,
}

impl DeviceMemory {
    /// Device the memory lives on.
    #[must_use]
    pub const fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-byte allocation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Scratch allocator available to custom calls.
pub trait DeviceMemoryAllocator: Send + Sync + fmt::Debug {
    /// Allocates `size` zeroed bytes on `device_ordinal`.
    fn allocate(&self, device_ordinal: i32, size: usize) -> Result<DeviceMemory>;

    /// Returns memory to the allocator.
    fn deallocate(&self, memory: DeviceMemory);
}

/// Allocation bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    /// Successful allocations so far.
    pub num_allocs: u64,
    /// Bytes currently handed out.
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes_in_use: usize,
    /// Allocations refused for exceeding the limit.
    pub num_refused: u64,
}

/// Heap-backed allocator with an optional byte limit.
#[derive(Debug, Default)]
pub struct HostMemoryAllocator {
    limit: Option<usize>,
    stats: Mutex<AllocatorStats>,
}

impl HostMemoryAllocator {
    /// An allocator without a limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An allocator refusing to hand out more than `limit` bytes at once.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            stats: Mutex::new(AllocatorStats::default()),
        }
    }

    /// Snapshot of the bookkeeping counters.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        *self.stats.lock()
    }
}

impl DeviceMemoryAllocator for HostMemoryAllocator {
    fn allocate(&self, device_ordinal: i32, size: usize) -> Result<DeviceMemory> {
        {
            let mut stats = self.stats.lock();
            let wanted = stats.bytes_in_use.saturating_add(size);
            if self.limit.is_some_and(|limit| wanted > limit) {
                stats.num_refused += 1;
                return Err(Error::resource_exhausted(format!(
                    "allocating {size} bytes would exceed the {} byte limit ({} in use)",
                    self.limit.unwrap_or_default(),
                    stats.bytes_in_use
                )));
            }
            stats.num_allocs += 1;
            stats.bytes_in_use = wanted;
            stats.peak_bytes_in_use = stats.peak_bytes_in_use.max(wanted);
        }
        Ok(DeviceMemory {
            device_ordinal,
            bytes: vec![0u8; size].into_boxed_slice(),
        })
    }

    fn deallocate(&self, memory: DeviceMemory) {
        let mut stats = self.stats.lock();
        stats.bytes_in_use = stats.bytes_in_use.saturating_sub(memory.len());
    }
}

/// Type-keyed metadata made available to foreign-function handlers.
#[derive(Default)]
pub struct FfiExecutionContext {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl FfiExecutionContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Looks up the value of type `T`.
    pub fn lookup<T: Any + Send + Sync>(&self) -> Result<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .ok_or_else(|| Error::not_found("execution context entry", std::any::type_name::<T>()))
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for FfiExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfiExecutionContext")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn allocator_tracks_usage() {
        let alloc = HostMemoryAllocator::with_limit(16);
        let a = alloc.allocate(0, 10).expect("alloc");
        assert_eq!(a.len(), 10);
        let err = alloc.allocate(0, 10).expect_err("limit");
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        alloc.deallocate(a);
        let stats = alloc.stats();
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.peak_bytes_in_use, 10);
        assert_eq!(stats.num_refused, 1);
    }

    #[test]
    fn ffi_context_lookup_by_type() {
        #[derive(Debug, PartialEq)]
        struct Scale(f32);

        let mut ctx = FfiExecutionContext::new();
        ctx.insert(Scale(2.0));
        assert_eq!(ctx.lookup::<Scale>().expect("scale"), &Scale(2.0));
        let err = ctx.lookup::<u64>().expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn streams_are_distinct() {
        let a = Stream::new(1);
        let b = Stream::new(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.device_ordinal(), 1);
    }
}
