//! Conditional execution of one of several nested sequences.

use crate::buffer::{BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::executor::ThunkExecutor;
use crate::runtime::ExecutorConfig;
use crate::sync::ExecuteEvent;
use crate::thunk::{
    BufferUses, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind, ThunkSequence,
};
use crate::tracing_compat::trace;
use crate::types::PrimitiveType;

/// Picks a branch by reading an index from a buffer.
///
/// A `Pred` index selects branch 0 when true and branch 1 when false. An
/// `S32` index outside `0..branches` selects the last branch.
#[derive(Debug)]
pub struct ConditionalThunk {
    info: ThunkInfo,
    branch_index: BufferSlice,
    index_type: PrimitiveType,
    branches: Vec<ThunkExecutor>,
}

impl ConditionalThunk {
    /// Validates the index type and branch count.
    pub fn new(
        info: ThunkInfo,
        branch_index: BufferSlice,
        index_type: PrimitiveType,
        branches: Vec<ThunkSequence>,
    ) -> Result<Self> {
        Self::with_config(
            info,
            branch_index,
            index_type,
            branches,
            &ExecutorConfig::default(),
        )
    }

    /// Like [`ConditionalThunk::new`], building every branch executor from
    /// `config`.
    pub fn with_config(
        info: ThunkInfo,
        branch_index: BufferSlice,
        index_type: PrimitiveType,
        branches: Vec<ThunkSequence>,
        config: &ExecutorConfig,
    ) -> Result<Self> {
        match index_type {
            PrimitiveType::Pred if branches.len() != 2 => {
                return Err(Error::invalid_argument(format!(
                    "predicated conditional needs exactly 2 branches, got {}",
                    branches.len()
                )));
            }
            PrimitiveType::Pred | PrimitiveType::S32 => {}
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported branch index type {other:?}"
                )));
            }
        }
        if branches.is_empty() {
            return Err(Error::invalid_argument("conditional without branches"));
        }
        if branch_index.size != index_type.byte_width() {
            return Err(Error::invalid_argument(format!(
                "branch index {branch_index:?} does not hold one {index_type:?}"
            )));
        }
        Ok(Self {
            info,
            branch_index,
            index_type,
            branches: branches
                .into_iter()
                .map(|branch| ThunkExecutor::with_config(branch, config))
                .collect(),
        })
    }

    /// Number of branches.
    #[must_use]
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    fn select(&self, params: &ExecuteParams) -> Result<usize> {
        let bytes = params.buffer_allocations().read_to_vec(self.branch_index)?;
        let last = self.branches.len() - 1;
        let index = match self.index_type {
            PrimitiveType::Pred => {
                if bytes.first().is_some_and(|b| *b != 0) {
                    0
                } else {
                    1
                }
            }
            _ => {
                let raw = <[u8; 4]>::try_from(bytes.as_slice())
                    .map(i32::from_ne_bytes)
                    .map_err(|_| Error::invalid_argument("branch index is not an s32"))?;
                usize::try_from(raw).map_or(last, |i| i.min(last))
            }
        };
        Ok(index)
    }
}

impl Thunk for ConditionalThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Conditional
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        let mut uses = BufferUses::new();
        uses.push(BufferUse::read(self.branch_index));
        for branch in &self.branches {
            uses.extend(branch.sequence().buffer_uses());
        }
        uses
    }

    fn resource_uses(&self) -> ResourceUses {
        self.branches
            .iter()
            .flat_map(|b| b.sequence().resource_uses())
            .collect()
    }

    fn nested_sequences(&self) -> Vec<&ThunkSequence> {
        self.branches.iter().map(ThunkExecutor::sequence).collect()
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        match self.select(params) {
            Ok(index) => {
                trace!(op = %self.info, branch = index, "taking conditional branch");
                self.branches[index].execute(params)
            }
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocations;
    use crate::thunks::CopyThunk;
    use std::sync::Arc;

    // branch i copies slot i+1 into slot 0
    fn branches(n: usize) -> Vec<ThunkSequence> {
        (0..n)
            .map(|i| {
                ThunkSequence::of(|| {
                    CopyThunk::new(
                        ThunkInfo::new(format!("branch{i}")),
                        BufferSlice::new(i + 1, 0, 1),
                        BufferSlice::new(0, 0, 1),
                    )
                })
                .expect("branch")
            })
            .collect()
    }

    fn run(cond: &ConditionalThunk, index_bytes: Vec<u8>, n: usize) -> u8 {
        let mut slots = vec![vec![0u8]];
        slots.extend((0..n).map(|i| vec![10 + u8::try_from(i).expect("small")]));
        slots.push(index_bytes);
        let buffers = Arc::new(BufferAllocations::new(slots));
        cond.execute(&ExecuteParams::builder(Arc::clone(&buffers)).build())
            .wait()
            .expect("conditional");
        buffers.snapshot()[0][0]
    }

    #[test]
    fn s32_index_selects_branch_and_clamps() {
        let cond = ConditionalThunk::new(
            ThunkInfo::new("cond"),
            BufferSlice::new(4, 0, 4),
            PrimitiveType::S32,
            branches(3),
        )
        .expect("cond");
        assert_eq!(run(&cond, 1i32.to_ne_bytes().to_vec(), 3), 11);
        assert_eq!(run(&cond, 9i32.to_ne_bytes().to_vec(), 3), 12);
        assert_eq!(run(&cond, (-1i32).to_ne_bytes().to_vec(), 3), 12);
    }

    #[test]
    fn pred_true_takes_first_branch() {
        let cond = ConditionalThunk::new(
            ThunkInfo::new("cond"),
            BufferSlice::new(3, 0, 1),
            PrimitiveType::Pred,
            branches(2),
        )
        .expect("cond");
        assert_eq!(run(&cond, vec![1], 2), 10);
        assert_eq!(run(&cond, vec![0], 2), 11);
    }

    #[test]
    fn branch_executors_follow_config() {
        let config = ExecutorConfig::default().verify_footprints(false);
        let cond = ConditionalThunk::with_config(
            ThunkInfo::new("cond"),
            BufferSlice::new(3, 0, 1),
            PrimitiveType::Pred,
            branches(2),
            &config,
        )
        .expect("cond");
        assert!(cond.branches.iter().all(|b| !b.verifies_footprints()));
        assert_eq!(run(&cond, vec![1], 2), 10);
    }

    #[test]
    fn footprint_covers_index_and_branches() {
        let cond = ConditionalThunk::new(
            ThunkInfo::new("cond"),
            BufferSlice::new(4, 0, 4),
            PrimitiveType::S32,
            branches(3),
        )
        .expect("cond");
        assert_eq!(cond.buffer_uses().len(), 7);
        assert_eq!(cond.nested_sequences().len(), 3);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(ConditionalThunk::new(
            ThunkInfo::new("c"),
            BufferSlice::new(0, 0, 1),
            PrimitiveType::Pred,
            branches(3),
        )
        .is_err());
        assert!(ConditionalThunk::new(
            ThunkInfo::new("c"),
            BufferSlice::new(0, 0, 4),
            PrimitiveType::F32,
            branches(2),
        )
        .is_err());
        assert!(ConditionalThunk::new(
            ThunkInfo::new("c"),
            BufferSlice::new(0, 0, 4),
            PrimitiveType::S32,
            Vec::new(),
        )
        .is_err());
    }
}
