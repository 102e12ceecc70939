//! Infeed and outfeed operations.
//!
//! Both kinds declare a write of a shared ordering token, so feeds that share
//! a token keep program order and pull from or push to the queues in the
//! order the compiler emitted them.

use std::sync::Arc;

use crate::buffer::{BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceUse};
use crate::sync::{AsyncValue, ExecuteEvent};
use crate::thunk::{BufferUses, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind};

/// Fills each destination with the next buffer from the infeed queue.
///
/// Does not block when the queue is empty; the event resolves once every
/// destination has been filled.
#[derive(Debug)]
pub struct InfeedThunk {
    info: ThunkInfo,
    destinations: Vec<BufferSlice>,
    token: Arc<Resource>,
}

impl InfeedThunk {
    /// An infeed filling `destinations` in order.
    #[must_use]
    pub fn new(info: ThunkInfo, destinations: Vec<BufferSlice>, token: &Arc<Resource>) -> Self {
        Self {
            info,
            destinations,
            token: Arc::clone(token),
        }
    }

    fn launch(&self, params: &ExecuteParams) -> Result<ExecuteEvent> {
        let infeed = params.xfeed()?.infeed();
        let filled: Vec<ExecuteEvent> = self
            .destinations
            .iter()
            .map(|&destination| {
                let params = params.clone();
                infeed.dequeue().try_map(move |bytes| {
                    if bytes.len() != destination.size {
                        return Err(Error::invalid_argument(format!(
                            "infeed delivered {} bytes for {destination:?}",
                            bytes.len()
                        )));
                    }
                    params.buffer_allocations().write_from(destination, bytes)
                })
            })
            .collect();
        Ok(AsyncValue::join(filled))
    }
}

impl Thunk for InfeedThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Infeed
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        self.destinations.iter().copied().map(BufferUse::write).collect()
    }

    fn resource_uses(&self) -> ResourceUses {
        ResourceUses::from_iter([ResourceUse::write(&self.token)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        self.launch(params).unwrap_or_else(ExecuteEvent::failed)
    }
}

/// Pushes a copy of each source onto the outfeed queue, in order.
#[derive(Debug)]
pub struct OutfeedThunk {
    info: ThunkInfo,
    sources: Vec<BufferSlice>,
    token: Arc<Resource>,
}

impl OutfeedThunk {
    /// An outfeed of `sources` in order.
    #[must_use]
    pub fn new(info: ThunkInfo, sources: Vec<BufferSlice>, token: &Arc<Resource>) -> Self {
        Self {
            info,
            sources,
            token: Arc::clone(token),
        }
    }

    fn push(&self, params: &ExecuteParams) -> Result<()> {
        let outfeed = params.xfeed()?.outfeed();
        let buffers = self
            .sources
            .iter()
            .map(|&s| params.buffer_allocations().read_to_vec(s))
            .collect::<Result<Vec<_>>>()?;
        for buffer in buffers {
            outfeed.enqueue(buffer);
        }
        Ok(())
    }
}

impl Thunk for OutfeedThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Outfeed
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        self.sources.iter().copied().map(BufferUse::read).collect()
    }

    fn resource_uses(&self) -> ResourceUses {
        ResourceUses::from_iter([ResourceUse::write(&self.token)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        match self.push(params) {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}
