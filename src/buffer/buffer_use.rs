//! Buffer footprint descriptors.

use core::fmt;
use core::ops::Range;

/// How an operation touches a buffer or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryAccess {
    /// Shared, read-only access.
    Read,
    /// Exclusive access; the operation may mutate the contents.
    Write,
}

impl MemoryAccess {
    /// Returns true for [`MemoryAccess::Write`].
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// A byte range inside one slot of the allocation table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlice {
    /// Slot index in the allocation table.
    pub index: usize,
    /// Byte offset into the slot.
    pub offset: usize,
    /// Length in bytes.
    pub size: usize,
}

impl BufferSlice {
    /// Creates a slice covering `size` bytes at `offset` in slot `index`.
    #[must_use]
    pub const fn new(index: usize, offset: usize, size: usize) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    /// Byte range inside the slot.
    ///
    /// Saturates instead of overflowing; bounds are checked by the allocation
    /// table on access.
    #[must_use]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset.saturating_add(self.size)
    }
}

impl fmt::Debug for BufferSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slice#{}[{}..{}]",
            self.index,
            self.offset,
            self.offset.saturating_add(self.size)
        )
    }
}

/// One entry of an operation's buffer footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUse {
    slice: BufferSlice,
    access: MemoryAccess,
}

impl BufferUse {
    /// Creates a buffer use with an explicit access mode.
    #[must_use]
    pub const fn new(slice: BufferSlice, access: MemoryAccess) -> Self {
        Self { slice, access }
    }

    /// Declares a read of `slice`.
    #[must_use]
    pub const fn read(slice: BufferSlice) -> Self {
        Self::new(slice, MemoryAccess::Read)
    }

    /// Declares a write of `slice`.
    #[must_use]
    pub const fn write(slice: BufferSlice) -> Self {
        Self::new(slice, MemoryAccess::Write)
    }

    /// The touched slice.
    #[must_use]
    pub const fn slice(&self) -> BufferSlice {
        self.slice
    }

    /// The access mode.
    #[must_use]
    pub const fn access(&self) -> MemoryAccess {
        self.access
    }

    /// Two uses conflict when they name the same slot and at least one writes.
    ///
    /// Byte ranges are not compared: two writes to disjoint halves of one
    /// slot are still ordered.
    #[must_use]
    pub const fn conflicts(&self, other: &Self) -> bool {
        self.slice.index == other.slice.index
            && (self.access.is_write() || other.access.is_write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_never_conflict() {
        let a = BufferUse::read(BufferSlice::new(0, 0, 8));
        let b = BufferUse::read(BufferSlice::new(0, 0, 8));
        assert!(!a.conflicts(&b));
    }

    #[test]
    fn write_conflicts_with_any_use_of_same_slot() {
        let w = BufferUse::write(BufferSlice::new(2, 0, 4));
        let r = BufferUse::read(BufferSlice::new(2, 4, 4));
        assert!(w.conflicts(&r));
        assert!(r.conflicts(&w));
        assert!(w.conflicts(&w));
    }

    #[test]
    fn different_slots_do_not_conflict() {
        let a = BufferUse::write(BufferSlice::new(0, 0, 4));
        let b = BufferUse::write(BufferSlice::new(1, 0, 4));
        assert!(!a.conflicts(&b));
    }

    #[test]
    fn debug_shows_range() {
        assert_eq!(format!("{:?}", BufferSlice::new(3, 8, 16)), "slice#3[8..24]");
    }
}
