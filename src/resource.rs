//! Shared non-buffer resources and their footprint descriptors.
//!
//! Some operations serialize on state that does not live in the allocation
//! table: collective communicators, the RNG state, or explicit ordering
//! tokens. Each such piece of state is modelled as a [`Resource`] with a
//! process-unique id; operations that touch it declare a [`ResourceUse`].

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::MemoryAccess;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Category of a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Pure ordering token with no backing state.
    Token,
    /// State of a collective communicator.
    CollectiveCommunicator,
    /// Random number generator state.
    RngState,
}

/// A shared resource identified by a process-unique id.
#[derive(PartialEq, Eq, Hash)]
pub struct Resource {
    kind: ResourceKind,
    id: u64,
}

impl Resource {
    /// Creates a new resource with a fresh id.
    #[must_use]
    pub fn create(kind: ResourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Resource category.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Process-unique identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// One entry of an operation's resource footprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUse {
    resource: Arc<Resource>,
    access: MemoryAccess,
}

impl ResourceUse {
    /// Declares a read of `resource`.
    #[must_use]
    pub fn read(resource: &Arc<Resource>) -> Self {
        Self {
            resource: Arc::clone(resource),
            access: MemoryAccess::Read,
        }
    }

    /// Declares a write of `resource`.
    #[must_use]
    pub fn write(resource: &Arc<Resource>) -> Self {
        Self {
            resource: Arc::clone(resource),
            access: MemoryAccess::Write,
        }
    }

    /// The touched resource.
    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// The access mode.
    #[must_use]
    pub const fn access(&self) -> MemoryAccess {
        self.access
    }

    /// Same conflict rule as buffers: same resource, at least one write.
    #[must_use]
    pub fn conflicts(&self, other: &Self) -> bool {
        self.resource.id == other.resource.id
            && (self.access.is_write() || other.access.is_write())
    }
}
