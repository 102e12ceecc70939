//! Identifier types for runs and devices.

use core::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_RUN_ID: AtomicI64 = AtomicI64::new(1);

/// Identifies one invocation of a compiled program.
///
/// Concurrent invocations of the same program carry distinct run ids, which
/// keeps their collective rendezvous groups apart.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(i64);

impl RunId {
    /// Allocates a fresh, process-unique run id.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an externally chosen run id (all participants must agree on it).
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunId({})", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run{}", self.0)
    }
}

/// A device id that is unique across all processes taking part in a run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalDeviceId(pub i64);

impl GlobalDeviceId {
    /// Returns the raw id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for GlobalDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalDeviceId({})", self.0)
    }
}

impl fmt::Display for GlobalDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}
