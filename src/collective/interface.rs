//! Collectives transport seen by collective operations.

use std::fmt;

use crate::collective::RendezvousKey;
use crate::sync::AsyncValue;
use crate::types::{PrimitiveType, ReductionKind};

/// Data exchange for collective operations.
///
/// Every method is called once per participant with the same `key` and the
/// caller's `rank` (its index in `key.participants`). Methods return at once;
/// the result resolves after all participants have contributed.
pub trait CollectivesInterface: Send + Sync + fmt::Debug {
    /// Element-wise reduction of every participant's `input`.
    fn all_reduce(
        &self,
        key: RendezvousKey,
        rank: usize,
        kind: ReductionKind,
        dtype: PrimitiveType,
        input: Vec<u8>,
    ) -> AsyncValue<Vec<u8>>;

    /// Every participant's `input`, concatenated in rank order.
    fn all_gather(&self, key: RendezvousKey, rank: usize, input: Vec<u8>) -> AsyncValue<Vec<u8>>;

    /// The caller's shard of the element-wise reduction of all inputs.
    fn reduce_scatter(
        &self,
        key: RendezvousKey,
        rank: usize,
        kind: ReductionKind,
        dtype: PrimitiveType,
        input: Vec<u8>,
    ) -> AsyncValue<Vec<u8>>;

    /// `chunks[i]` goes to rank `i`; the result concatenates the chunk each
    /// rank sent to the caller, in rank order.
    fn all_to_all(
        &self,
        key: RendezvousKey,
        rank: usize,
        chunks: Vec<Vec<u8>>,
    ) -> AsyncValue<Vec<u8>>;

    /// Sends `input` along `(source, target)` rank pairs. Resolves to the
    /// data sent to the caller, or `None` if no pair targets it.
    fn collective_permute(
        &self,
        key: RendezvousKey,
        rank: usize,
        source_target_pairs: &[(usize, usize)],
        input: Vec<u8>,
    ) -> AsyncValue<Option<Vec<u8>>>;
}
