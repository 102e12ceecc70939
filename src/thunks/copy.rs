//! Buffer-to-buffer copy.

use crate::buffer::{BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::sync::ExecuteEvent;
use crate::thunk::{BufferUses, ExecuteParams, Thunk, ThunkInfo, ThunkKind};

/// Copies `src` into `dst`. Runs synchronously.
#[derive(Debug)]
pub struct CopyThunk {
    info: ThunkInfo,
    src: BufferSlice,
    dst: BufferSlice,
}

impl CopyThunk {
    /// Fails if the two slices differ in size.
    pub fn new(info: ThunkInfo, src: BufferSlice, dst: BufferSlice) -> Result<Self> {
        if src.size != dst.size {
            return Err(Error::invalid_argument(format!(
                "copy source {src:?} and destination {dst:?} differ in size"
            )));
        }
        Ok(Self { info, src, dst })
    }

    /// Source slice.
    #[must_use]
    pub const fn src(&self) -> BufferSlice {
        self.src
    }

    /// Destination slice.
    #[must_use]
    pub const fn dst(&self) -> BufferSlice {
        self.dst
    }
}

impl Thunk for CopyThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Copy
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        BufferUses::from_iter([BufferUse::read(self.src), BufferUse::write(self.dst)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        match params.buffer_allocations().copy(self.src, self.dst) {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAllocations, MemoryAccess};
    use std::sync::Arc;

    #[test]
    fn copies_bytes() {
        let buffers = Arc::new(BufferAllocations::new(vec![vec![1, 2, 3, 4], vec![0; 4]]));
        let thunk = CopyThunk::new(
            ThunkInfo::new("copy"),
            BufferSlice::new(0, 1, 2),
            BufferSlice::new(1, 2, 2),
        )
        .expect("thunk");
        let params = ExecuteParams::builder(Arc::clone(&buffers)).build();
        thunk.execute(&params).wait().expect("copy");
        assert_eq!(buffers.snapshot()[1], vec![0, 0, 2, 3]);
    }

    #[test]
    fn footprint_reads_source_writes_destination() {
        let thunk = CopyThunk::new(
            ThunkInfo::new("copy"),
            BufferSlice::new(0, 0, 4),
            BufferSlice::new(1, 0, 4),
        )
        .expect("thunk");
        let uses = thunk.buffer_uses();
        assert_eq!(uses[0].access(), MemoryAccess::Read);
        assert_eq!(uses[1].access(), MemoryAccess::Write);
        assert_eq!(uses[1].slice().index, 1);
    }

    #[test]
    fn out_of_range_fails_the_event() {
        let buffers = Arc::new(BufferAllocations::with_sizes(&[4]));
        let thunk = CopyThunk::new(
            ThunkInfo::new("copy"),
            BufferSlice::new(0, 0, 4),
            BufferSlice::new(3, 0, 4),
        )
        .expect("thunk");
        let event = thunk.execute(&ExecuteParams::builder(buffers).build());
        assert_eq!(
            event.error().map(Error::kind),
            Some(crate::ErrorKind::InvalidArgument)
        );
    }
}
