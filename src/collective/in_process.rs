//! Collectives between participants living in one process.

use std::fmt;
use std::sync::Arc;

use crate::collective::{CollectivesInterface, Rendezvous, RendezvousKey};
use crate::error::{Error, Result};
use crate::runtime::ExecutorConfig;
use crate::sync::AsyncValue;
use crate::types::primitive::reduce_into;
use crate::types::{PrimitiveType, ReductionKind};

/// [`CollectivesInterface`] built on in-memory rendezvous.
///
/// Participants share one instance; each collective kind has its own
/// rendezvous so operation ids only need to be unique per kind.
pub struct InProcessCollectives {
    reduce: Arc<Rendezvous<Vec<u8>>>,
    gather: Arc<Rendezvous<Vec<u8>>>,
    scatter: Arc<Rendezvous<Vec<u8>>>,
    all_to_all: Arc<Rendezvous<Vec<Vec<u8>>>>,
    permute: Arc<Rendezvous<Vec<u8>>>,
}

impl InProcessCollectives {
    /// Rendezvous timing taken from `config`.
    #[must_use]
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            reduce: Rendezvous::with_config("all-reduce", config),
            gather: Rendezvous::with_config("all-gather", config),
            scatter: Rendezvous::with_config("reduce-scatter", config),
            all_to_all: Rendezvous::with_config("all-to-all", config),
            permute: Rendezvous::with_config("collective-permute", config),
        }
    }
}

impl Default for InProcessCollectives {
    fn default() -> Self {
        Self::new(&ExecutorConfig::default())
    }
}

fn reduce_all(dtype: PrimitiveType, kind: ReductionKind, inputs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| Error::invalid_argument("reduction over zero participants"))?;
    let mut acc = first.clone();
    for input in rest {
        reduce_into(dtype, kind, &mut acc, input)?;
    }
    Ok(acc)
}

impl CollectivesInterface for InProcessCollectives {
    fn all_reduce(
        &self,
        key: RendezvousKey,
        rank: usize,
        kind: ReductionKind,
        dtype: PrimitiveType,
        input: Vec<u8>,
    ) -> AsyncValue<Vec<u8>> {
        self.reduce
            .arrive(key, rank, input)
            .try_map(move |inputs| reduce_all(dtype, kind, inputs))
    }

    fn all_gather(&self, key: RendezvousKey, rank: usize, input: Vec<u8>) -> AsyncValue<Vec<u8>> {
        self.gather
            .arrive(key, rank, input)
            .map(|inputs| inputs.concat())
    }

    fn reduce_scatter(
        &self,
        key: RendezvousKey,
        rank: usize,
        kind: ReductionKind,
        dtype: PrimitiveType,
        input: Vec<u8>,
    ) -> AsyncValue<Vec<u8>> {
        let n = key.num_participants();
        self.scatter
            .arrive(key, rank, input)
            .try_map(move |inputs| {
                let reduced = reduce_all(dtype, kind, inputs)?;
                let shard_elems = reduced.len() / dtype.byte_width() / n;
                if shard_elems * n * dtype.byte_width() != reduced.len() {
                    return Err(Error::invalid_argument(format!(
                        "{} bytes of {dtype:?} cannot be scattered evenly over {n} ranks",
                        reduced.len()
                    )));
                }
                let shard = shard_elems * dtype.byte_width();
                Ok(reduced[rank * shard..(rank + 1) * shard].to_vec())
            })
    }

    fn all_to_all(
        &self,
        key: RendezvousKey,
        rank: usize,
        chunks: Vec<Vec<u8>>,
    ) -> AsyncValue<Vec<u8>> {
        let n = key.num_participants();
        if chunks.len() != n {
            return AsyncValue::failed(Error::invalid_argument(format!(
                "all-to-all needs {n} chunks, got {}",
                chunks.len()
            )));
        }
        self.all_to_all.arrive(key, rank, chunks).map(move |sent| {
            sent.iter()
                .flat_map(|from| from[rank].iter().copied())
                .collect()
        })
    }

    fn collective_permute(
        &self,
        key: RendezvousKey,
        rank: usize,
        source_target_pairs: &[(usize, usize)],
        input: Vec<u8>,
    ) -> AsyncValue<Option<Vec<u8>>> {
        let source = source_target_pairs
            .iter()
            .find(|(_, target)| *target == rank)
            .map(|(source, _)| *source);
        self.permute
            .arrive(key, rank, input)
            .try_map(move |inputs| match source {
                None => Ok(None),
                Some(s) => inputs.get(s).cloned().map(Some).ok_or_else(|| {
                    Error::invalid_argument(format!("permute source rank {s} out of range"))
                }),
            })
    }
}

impl fmt::Debug for InProcessCollectives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessCollectives")
            .field("all_reduce", &self.reduce)
            .field("all_gather", &self.gather)
            .field("reduce_scatter", &self.scatter)
            .field("all_to_all", &self.all_to_all)
            .field("collective_permute", &self.permute)
            .finish()
    }
}
