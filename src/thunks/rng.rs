//! RNG state read-and-advance.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceKind, ResourceUse};
use crate::sync::ExecuteEvent;
use crate::thunk::{BufferUses, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind};

const INITIAL_STATE: u128 = 0x701_2395;

/// Writes the current 128-bit RNG state, then advances it by `delta`.
///
/// The state lives in the thunk and is shared by every run, so the thunk
/// declares a write of its RNG state resource.
#[derive(Debug)]
pub struct RngGetAndUpdateStateThunk {
    info: ThunkInfo,
    state_buffer: BufferSlice,
    delta: u128,
    state: Mutex<u128>,
    resource: Arc<Resource>,
}

impl RngGetAndUpdateStateThunk {
    /// `state_buffer` must hold 16 bytes.
    pub fn new(info: ThunkInfo, state_buffer: BufferSlice, delta: u64) -> Result<Self> {
        if state_buffer.size != 16 {
            return Err(Error::invalid_argument(format!(
                "rng state buffer {state_buffer:?} must be 16 bytes"
            )));
        }
        Ok(Self {
            info,
            state_buffer,
            delta: u128::from(delta),
            state: Mutex::new(INITIAL_STATE),
            resource: Resource::create(ResourceKind::RngState),
        })
    }

    /// The RNG state resource.
    #[must_use]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
}

impl Thunk for RngGetAndUpdateStateThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::RngGetAndUpdateState
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        BufferUses::from_iter([BufferUse::write(self.state_buffer)])
    }

    fn resource_uses(&self) -> ResourceUses {
        ResourceUses::from_iter([ResourceUse::write(&self.resource)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        let current = {
            let mut state = self.state.lock();
            let current = *state;
            *state = state.wrapping_add(self.delta);
            current
        };
        match params
            .buffer_allocations()
            .write_from(self.state_buffer, &current.to_ne_bytes())
        {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}
