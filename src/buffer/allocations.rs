//! Host buffer allocation table.
//!
//! The table is built once per run by the caller and handed to operations
//! through `ExecuteParams`. It is never resized while a run is in flight;
//! operations only borrow slot contents through short-lived guards.

use std::fmt;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::buffer::BufferSlice;
use crate::error::{Error, Result};

/// Ordered table of host buffers indexed by slot.
pub struct BufferAllocations {
    slots: Vec<RwLock<Box<[u8]>>>,
}

impl BufferAllocations {
    /// Wraps pre-filled buffers; slot `i` is `buffers[i]`.
    #[must_use]
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self {
            slots: buffers
                .into_iter()
                .map(|b| RwLock::new(b.into_boxed_slice()))
                .collect(),
        }
    }

    /// Allocates zeroed slots of the given sizes.
    #[must_use]
    pub fn with_sizes(sizes: &[usize]) -> Self {
        Self::new(sizes.iter().map(|&n| vec![0u8; n]).collect())
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size in bytes of slot `index`.
    pub fn size_of(&self, index: usize) -> Result<usize> {
        self.slot(index).map(|s| s.read().len())
    }

    fn slot(&self, index: usize) -> Result<&RwLock<Box<[u8]>>> {
        self.slots.get(index).ok_or_else(|| {
            Error::invalid_argument(format!(
                "buffer slot {index} out of range (table has {} slots)",
                self.slots.len()
            ))
        })
    }

    fn check_bounds(slice: BufferSlice, len: usize) -> Result<()> {
        let end = slice.offset.checked_add(slice.size);
        match end {
            Some(end) if end <= len => Ok(()),
            _ => Err(Error::invalid_argument(format!(
                "{slice:?} exceeds slot size {len}"
            ))),
        }
    }

    /// Borrows `slice` for reading.
    pub fn read(&self, slice: BufferSlice) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        let guard = self.slot(slice.index)?.read();
        Self::check_bounds(slice, guard.len())?;
        let range = slice.range();
        Ok(RwLockReadGuard::map(guard, |b| &(**b)[range]))
    }

    /// Borrows `slice` for writing.
    pub fn write(&self, slice: BufferSlice) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        let guard = self.slot(slice.index)?.write();
        Self::check_bounds(slice, guard.len())?;
        let range = slice.range();
        Ok(RwLockWriteGuard::map(guard, |b| &mut (**b)[range]))
    }

    /// Copies a slice's bytes out of the table.
    pub fn read_to_vec(&self, slice: BufferSlice) -> Result<Vec<u8>> {
        self.read(slice).map(|g| g.to_vec())
    }

    /// Overwrites `slice` with `bytes`, which must have the slice's size.
    pub fn write_from(&self, slice: BufferSlice, bytes: &[u8]) -> Result<()> {
        if bytes.len() != slice.size {
            return Err(Error::invalid_argument(format!(
                "cannot write {} bytes into {slice:?}",
                bytes.len()
            )));
        }
        self.write(slice)?.copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `src` into `dst`. Both slices may live in the same slot.
    pub fn copy(&self, src: BufferSlice, dst: BufferSlice) -> Result<()> {
        if src.size != dst.size {
            return Err(Error::invalid_argument(format!(
                "copy size mismatch: {src:?} -> {dst:?}"
            )));
        }
        if src.index == dst.index {
            let mut guard = self.slot(src.index)?.write();
            Self::check_bounds(src, guard.len())?;
            Self::check_bounds(dst, guard.len())?;
            guard.copy_within(src.range(), dst.offset);
            return Ok(());
        }
        let from = self.read(src)?;
        self.write(dst)?.copy_from_slice(&from);
        Ok(())
    }

    /// Copies out every slot, for inspection after a run.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.slots.iter().map(|s| s.read().to_vec()).collect()
    }
}

impl fmt::Debug for BufferAllocations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAllocations")
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn read_write_roundtrip() {
        let table = BufferAllocations::with_sizes(&[8, 4]);
        table
            .write_from(BufferSlice::new(0, 4, 4), &[1, 2, 3, 4])
            .expect("write");
        assert_eq!(
            table.read_to_vec(BufferSlice::new(0, 0, 8)).expect("read"),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
        assert_eq!(table.size_of(1).expect("size"), 4);
    }

    #[test]
    fn out_of_range_is_invalid_argument() {
        let table = BufferAllocations::with_sizes(&[4]);
        let err = table.read(BufferSlice::new(0, 2, 4)).expect_err("oob");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = table.write(BufferSlice::new(5, 0, 1)).expect_err("bad slot");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn copy_within_one_slot() {
        let table = BufferAllocations::new(vec![vec![9, 8, 0, 0]]);
        table
            .copy(BufferSlice::new(0, 0, 2), BufferSlice::new(0, 2, 2))
            .expect("copy");
        assert_eq!(table.snapshot(), vec![vec![9, 8, 9, 8]]);
    }

    #[test]
    fn copy_across_slots() {
        let table = BufferAllocations::new(vec![vec![5, 6], vec![0, 0]]);
        table
            .copy(BufferSlice::new(0, 0, 2), BufferSlice::new(1, 0, 2))
            .expect("copy");
        assert_eq!(table.snapshot()[1], vec![5, 6]);
    }
}
