//! Collective operations.
//!
//! Every participant of a collective runs the same [`CollectiveThunk`] for
//! its own device. The thunk works out the participating devices from the
//! replica groups and the device assignment, hands its source buffer to the
//! collectives transport and writes the exchanged result into its
//! destination when the rendezvous completes. Nothing blocks: the returned
//! event stays pending until the last participant arrives, or fails with a
//! rendezvous timeout if one never does.
//!
//! Collectives declare a write of a communicator [`Resource`], so two
//! collectives sharing a communicator never run concurrently on the same
//! device even when their buffers are disjoint.

use std::sync::Arc;

use crate::buffer::{BufferSlice, BufferUse};
use crate::collective::RendezvousKey;
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceKind, ResourceUse};
use crate::sync::{AsyncValue, ExecuteEvent};
use crate::thunk::{
    BufferUses, CollectiveExecuteParams, ExecuteParams, ResourceUses, Thunk, ThunkInfo, ThunkKind,
};
use crate::tracing_compat::trace;
use crate::types::{GlobalDeviceId, PrimitiveType, ReductionKind};

/// What a collective computes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectiveOp {
    /// Element-wise reduction across participants.
    AllReduce {
        /// Reduction applied.
        reduction: ReductionKind,
        /// Element type.
        dtype: PrimitiveType,
    },
    /// Concatenation of every participant's source in rank order.
    AllGather,
    /// This participant's shard of the reduction.
    ReduceScatter {
        /// Reduction applied.
        reduction: ReductionKind,
        /// Element type.
        dtype: PrimitiveType,
    },
    /// The source split into one equal chunk per participant and exchanged.
    AllToAll,
    /// Point-to-point sends along `(source, target)` replica pairs.
    /// Participants that receive nothing get a zeroed destination.
    CollectivePermute {
        /// Source and target replica ids.
        source_target_pairs: Vec<(usize, usize)>,
    },
}

impl CollectiveOp {
    /// Operation kind reported by the thunk.
    #[must_use]
    pub const fn kind(&self) -> ThunkKind {
        match self {
            Self::AllReduce { .. } => ThunkKind::AllReduce,
            Self::AllGather => ThunkKind::AllGather,
            Self::ReduceScatter { .. } => ThunkKind::ReduceScatter,
            Self::AllToAll => ThunkKind::AllToAll,
            Self::CollectivePermute { .. } => ThunkKind::CollectivePermute,
        }
    }
}

/// Identity and grouping shared by every participant of one collective.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectiveOpParams {
    /// Collective id within the program; participants must agree on it.
    pub op_id: i64,
    /// Groups of replica ids that communicate. Empty means one group of
    /// every replica.
    pub replica_groups: Vec<Vec<usize>>,
}

impl CollectiveOpParams {
    /// Parameters for collective `op_id` over `replica_groups`.
    #[must_use]
    pub fn new(op_id: i64, replica_groups: Vec<Vec<usize>>) -> Self {
        Self {
            op_id,
            replica_groups,
        }
    }
}

/// One participant's share of a collective operation.
#[derive(Debug)]
pub struct CollectiveThunk {
    info: ThunkInfo,
    op: CollectiveOp,
    op_params: CollectiveOpParams,
    source: BufferSlice,
    destination: BufferSlice,
    communicator: Arc<Resource>,
}

impl CollectiveThunk {
    /// A collective reading `source` and writing `destination`.
    ///
    /// Collectives that must not overlap should share `communicator`.
    pub fn new(
        info: ThunkInfo,
        op: CollectiveOp,
        op_params: CollectiveOpParams,
        source: BufferSlice,
        destination: BufferSlice,
        communicator: &Arc<Resource>,
    ) -> Result<Self> {
        if communicator.kind() != ResourceKind::CollectiveCommunicator {
            return Err(Error::invalid_argument(format!(
                "{communicator:?} is not a collective communicator"
            )));
        }
        if let CollectiveOp::CollectivePermute {
            source_target_pairs,
        } = &op
        {
            for (i, (_, target)) in source_target_pairs.iter().enumerate() {
                if source_target_pairs[..i].iter().any(|(_, t)| t == target) {
                    return Err(Error::invalid_argument(format!(
                        "replica {target} is the target of more than one permute pair"
                    )));
                }
            }
        }
        Ok(Self {
            info,
            op,
            op_params,
            source,
            destination,
            communicator: Arc::clone(communicator),
        })
    }

    /// The collective computed.
    #[must_use]
    pub const fn op(&self) -> &CollectiveOp {
        &self.op
    }

    /// Devices of the caller's group in rank order, the caller's rank, and
    /// the caller's computation id.
    fn participants(
        &self,
        params: &CollectiveExecuteParams,
    ) -> Result<(Vec<GlobalDeviceId>, usize, usize)> {
        let assignment = params.device_assignment();
        let me = assignment.logical_id(params.global_device_id())?;
        let all_replicas: Vec<usize>;
        let group: &[usize] = if self.op_params.replica_groups.is_empty() {
            all_replicas = (0..assignment.replica_count()).collect();
            &all_replicas
        } else {
            self.op_params
                .replica_groups
                .iter()
                .find(|g| g.contains(&me.replica_id))
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "replica {} is not in any replica group of {}",
                        me.replica_id, self.info
                    ))
                })?
        };
        let devices = group
            .iter()
            .map(|&replica| {
                assignment.get(replica, me.computation_id).ok_or_else(|| {
                    Error::configuration(format!(
                        "replica {replica} is outside the device assignment"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let rank = group
            .iter()
            .position(|&r| r == me.replica_id)
            .ok_or_else(|| Error::internal("caller missing from its own replica group"))?;
        Ok((devices, rank, me.computation_id))
    }

    fn launch(&self, params: &ExecuteParams) -> Result<ExecuteEvent> {
        let collective = params.collective_params()?;
        let (participants, rank, computation) = self.participants(collective)?;
        let key = RendezvousKey {
            run_id: collective.run_id(),
            participants,
            op_id: self.op_params.op_id,
        };
        trace!(op = %self.info, kind = %self.op.kind(), key = %key, rank, "joining collective");

        let input = params.buffer_allocations().read_to_vec(self.source)?;
        let transport = collective.collectives();
        let output: AsyncValue<Vec<u8>> = match &self.op {
            CollectiveOp::AllReduce { reduction, dtype } => {
                transport.all_reduce(key, rank, *reduction, *dtype, input)
            }
            CollectiveOp::AllGather => transport.all_gather(key, rank, input),
            CollectiveOp::ReduceScatter { reduction, dtype } => {
                transport.reduce_scatter(key, rank, *reduction, *dtype, input)
            }
            CollectiveOp::AllToAll => {
                let n = key.num_participants();
                if n == 0 || input.len() % n != 0 {
                    return Err(Error::invalid_argument(format!(
                        "{} bytes cannot be split into {n} all-to-all chunks",
                        input.len()
                    )));
                }
                let width = input.len() / n;
                let chunks = (0..n)
                    .map(|i| input[i * width..(i + 1) * width].to_vec())
                    .collect();
                transport.all_to_all(key, rank, chunks)
            }
            CollectiveOp::CollectivePermute {
                source_target_pairs,
            } => {
                let ranks = to_ranks(source_target_pairs, &key, collective, computation);
                let size = self.destination.size;
                transport
                    .collective_permute(key, rank, &ranks, input)
                    .map(move |received| received.clone().unwrap_or_else(|| vec![0; size]))
            }
        };

        let params = params.clone();
        let destination = self.destination;
        Ok(output.try_map(move |bytes| {
            params
                .buffer_allocations()
                .write_from(destination, bytes)
        }))
    }
}

/// Rewrites replica pairs as ranks within the caller's group, dropping pairs
/// that leave the group.
fn to_ranks(
    pairs: &[(usize, usize)],
    key: &RendezvousKey,
    params: &CollectiveExecuteParams,
    computation: usize,
) -> Vec<(usize, usize)> {
    let assignment = params.device_assignment();
    let rank_of = |replica: usize| {
        assignment
            .get(replica, computation)
            .and_then(|device| key.participants.iter().position(|p| *p == device))
    };
    pairs
        .iter()
        .filter_map(|&(source, target)| Some((rank_of(source)?, rank_of(target)?)))
        .collect()
}

impl Thunk for CollectiveThunk {
    fn kind(&self) -> ThunkKind {
        self.op.kind()
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        BufferUses::from_iter([
            BufferUse::read(self.source),
            BufferUse::write(self.destination),
        ])
    }

    fn resource_uses(&self) -> ResourceUses {
        ResourceUses::from_iter([ResourceUse::write(&self.communicator)])
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        self.launch(params).unwrap_or_else(ExecuteEvent::failed)
    }
}
