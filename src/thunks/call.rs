//! Calls into a nested sequence.

use crate::executor::ThunkExecutor;
use crate::runtime::ExecutorConfig;
use crate::sync::ExecuteEvent;
use crate::thunk::{
    BufferUses, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind, ThunkSequence,
};

/// Runs a nested sequence with its own executor.
///
/// The footprint is the nested sequence's aggregated footprint, so the outer
/// executor orders the call conservatively against everything the callee
/// touches.
#[derive(Debug)]
pub struct CallThunk {
    info: ThunkInfo,
    called: ThunkExecutor,
}

impl CallThunk {
    /// Wraps `called` in a call operation.
    #[must_use]
    pub fn new(info: ThunkInfo, called: ThunkSequence) -> Self {
        Self::with_config(info, called, &ExecutorConfig::default())
    }

    /// Like [`CallThunk::new`], building the nested executor from `config`.
    #[must_use]
    pub fn with_config(info: ThunkInfo, called: ThunkSequence, config: &ExecutorConfig) -> Self {
        Self {
            info,
            called: ThunkExecutor::with_config(called, config),
        }
    }

    /// Executor for the called sequence.
    #[must_use]
    pub const fn called(&self) -> &ThunkExecutor {
        &self.called
    }
}

impl Thunk for CallThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Call
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        self.called.sequence().buffer_uses()
    }

    fn resource_uses(&self) -> ResourceUses {
        self.called.sequence().resource_uses()
    }

    fn nested_sequences(&self) -> Vec<&ThunkSequence> {
        vec![self.called.sequence()]
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        self.called.execute(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAllocations, BufferSlice};
    use crate::thunks::CopyThunk;
    use std::sync::Arc;

    #[test]
    fn runs_called_sequence() {
        let mut body = ThunkSequence::empty();
        body.push(
            CopyThunk::new(
                ThunkInfo::new("inner"),
                BufferSlice::new(0, 0, 2),
                BufferSlice::new(1, 0, 2),
            )
            .expect("copy"),
        );
        let call = CallThunk::new(ThunkInfo::new("call"), body);
        assert_eq!(call.buffer_uses().len(), 2);
        assert_eq!(call.nested_sequences().len(), 1);

        let buffers = Arc::new(BufferAllocations::new(vec![vec![7, 8], vec![0, 0]]));
        call.execute(&ExecuteParams::builder(Arc::clone(&buffers)).build())
            .wait()
            .expect("call");
        assert_eq!(buffers.snapshot()[1], vec![7, 8]);
    }

    #[test]
    fn called_graph_follows_config() {
        // 0 -> 1 -> 2 plus the implied 0 -> 2
        let chain = || {
            let mut body = ThunkSequence::empty();
            for (src, dst) in [(0, 1), (1, 2), (2, 0)] {
                body.push(
                    CopyThunk::new(
                        ThunkInfo::new(format!("copy{src}->{dst}")),
                        BufferSlice::new(src, 0, 1),
                        BufferSlice::new(dst, 0, 1),
                    )
                    .expect("copy"),
                );
            }
            body
        };
        let full = CallThunk::with_config(
            ThunkInfo::new("call"),
            chain(),
            &ExecutorConfig::default().transitive_reduction(false),
        );
        assert_eq!(full.called().graph().edge_count(), 3);
        let reduced = CallThunk::with_config(
            ThunkInfo::new("call"),
            chain(),
            &ExecutorConfig::default().transitive_reduction(true),
        );
        assert_eq!(reduced.called().graph().edge_count(), 2);
    }
}
