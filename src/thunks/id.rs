//! Replica and partition id operations.

use core::fmt;
use core::marker::PhantomData;

use crate::buffer::{BufferSlice, BufferUse};
use crate::collective::LogicalId;
use crate::error::{Error, Result};
use crate::sync::ExecuteEvent;
use crate::thunk::{BufferUses, ExecuteParams, Thunk, ThunkInfo, ThunkKind};

/// Which half of a [`LogicalId`] an id operation writes.
pub trait LogicalIdKind: Send + Sync + 'static {
    /// Operation kind reported by the thunk.
    const KIND: ThunkKind;

    /// Extracts the id.
    fn select(id: LogicalId) -> usize;
}

/// Selects the replica id.
#[derive(Debug)]
pub enum ReplicaIdKind {}

/// Selects the partition (computation) id.
#[derive(Debug)]
pub enum PartitionIdKind {}

impl LogicalIdKind for ReplicaIdKind {
    const KIND: ThunkKind = ThunkKind::ReplicaId;

    fn select(id: LogicalId) -> usize {
        id.replica_id
    }
}

impl LogicalIdKind for PartitionIdKind {
    const KIND: ThunkKind = ThunkKind::PartitionId;

    fn select(id: LogicalId) -> usize {
        id.computation_id
    }
}

/// Writes the caller's logical id as a native-endian `u32`.
pub struct LogicalIdThunk<K> {
    info: ThunkInfo,
    destination: BufferSlice,
    _kind: PhantomData<fn() -> K>,
}

/// Writes the replica id.
pub type ReplicaIdThunk = LogicalIdThunk<ReplicaIdKind>;

/// Writes the partition id.
pub type PartitionIdThunk = LogicalIdThunk<PartitionIdKind>;

impl<K: LogicalIdKind> LogicalIdThunk<K> {
    /// An id operation writing into `destination`, which must hold 4 bytes.
    #[must_use]
    pub const fn new(info: ThunkInfo, destination: BufferSlice) -> Self {
        Self {
            info,
            destination,
            _kind: PhantomData,
        }
    }

    fn write_id(&self, params: &ExecuteParams) -> Result<()> {
        let collective = params.collective_params()?;
        let id = collective
            .device_assignment()
            .logical_id(collective.global_device_id())?;
        let value = u32::try_from(K::select(id))
            .map_err(|_| Error::invalid_argument("logical id does not fit in u32"))?;
        params
            .buffer_allocations()
            .write_from(self.destination, &value.to_ne_bytes())
    }
}

impl<K: LogicalIdKind> Thunk for LogicalIdThunk<K> {
    fn kind(&self) -> ThunkKind {
        K::KIND
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        BufferUses::from_iter([BufferUse::write(self.destination)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        match self.write_id(params) {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}

impl<K: LogicalIdKind> fmt::Debug for LogicalIdThunk<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::KIND.as_str())
            .field("info", &self.info)
            .field("destination", &self.destination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocations;
    use crate::collective::{DeviceAssignment, InProcessCollectives};
    use crate::thunk::{CollectiveExecuteParams, RunOptions};
    use crate::types::{GlobalDeviceId, RunId};
    use std::sync::Arc;

    fn read_u32(buffers: &BufferAllocations) -> u32 {
        let bytes = buffers.read_to_vec(BufferSlice::new(0, 0, 4)).expect("read");
        u32::from_ne_bytes(bytes.try_into().expect("four bytes"))
    }

    #[test]
    fn writes_replica_and_partition_ids() {
        // 2 replicas x 2 partitions; device 2 sits at replica 1, partition 0.
        let assignment = DeviceAssignment::new(
            2,
            2,
            vec![
                GlobalDeviceId(0),
                GlobalDeviceId(1),
                GlobalDeviceId(2),
                GlobalDeviceId(3),
            ],
        )
        .expect("assignment");
        let options = RunOptions::new()
            .with_device_ordinal(2)
            .with_run_id(RunId::from_raw(1))
            .with_device_assignment(Arc::new(assignment))
            .with_collectives(Arc::new(InProcessCollectives::default()));
        let buffers = Arc::new(BufferAllocations::with_sizes(&[4]));
        let params = ExecuteParams::builder(Arc::clone(&buffers))
            .collective_params(CollectiveExecuteParams::create(&options).expect("params"))
            .build();

        ReplicaIdThunk::new(ThunkInfo::new("rid"), BufferSlice::new(0, 0, 4))
            .execute(&params)
            .wait()
            .expect("replica id");
        assert_eq!(read_u32(&buffers), 1);

        PartitionIdThunk::new(ThunkInfo::new("pid"), BufferSlice::new(0, 0, 4))
            .execute(&params)
            .wait()
            .expect("partition id");
        assert_eq!(read_u32(&buffers), 0);
    }

    #[test]
    fn kinds_and_footprint() {
        let rid = ReplicaIdThunk::new(ThunkInfo::new("rid"), BufferSlice::new(0, 0, 4));
        let pid = PartitionIdThunk::new(ThunkInfo::new("pid"), BufferSlice::new(0, 0, 4));
        assert_eq!(rid.kind(), ThunkKind::ReplicaId);
        assert_eq!(pid.kind(), ThunkKind::PartitionId);
        assert!(rid.buffer_uses()[0].access().is_write());
    }
}
