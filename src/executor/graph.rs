//! Dependency graph derived from operation footprints.
//!
//! Every pair of operations whose buffer or resource uses conflict is
//! ordered by a path in the graph. Edges come from per-slot and per-resource
//! hazard tracking: a read depends on the last writer, and a write depends on
//! the last writer and on every reader since. Edges therefore always point
//! forward in program order and the graph is a DAG by construction.
//!
//! With transitive reduction enabled, an edge `a -> c` is dropped when a path
//! `a -> b -> .. -> c` already orders the pair. The reduced graph admits the
//! same schedules; it only saves counter updates at run time.

use std::collections::HashMap;

use crate::thunk::{BufferUses, ResourceUses, ThunkSequence};
use crate::tracing_compat::trace;

/// One node per operation, indexed by program position.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Predecessors that must complete first.
    pub in_edges: Vec<usize>,
    /// Dependents released by this node's completion.
    pub out_edges: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Footprint {
    buffers: BufferUses,
    resources: ResourceUses,
}

impl Footprint {
    fn conflicts(&self, other: &Self) -> bool {
        self.buffers
            .iter()
            .any(|a| other.buffers.iter().any(|b| a.conflicts(b)))
            || self
                .resources
                .iter()
                .any(|a| other.resources.iter().any(|b| a.conflicts(b)))
    }

    /// One entry per touched key; a key both read and written counts as written.
    fn accesses(&self) -> Vec<(HazardKey, bool)> {
        let mut accesses: Vec<(HazardKey, bool)> = self
            .buffers
            .iter()
            .map(|u| (HazardKey::Slot(u.slice().index), u.access().is_write()))
            .chain(
                self.resources
                    .iter()
                    .map(|u| (HazardKey::Resource(u.resource().id()), u.access().is_write())),
            )
            .collect();
        accesses.sort_unstable_by_key(|&(key, write)| (key, !write));
        accesses.dedup_by_key(|&mut (key, _)| key);
        accesses
    }
}

/// What a hazard is tracked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum HazardKey {
    Slot(usize),
    Resource(u64),
}

#[derive(Debug, Default)]
struct Hazard {
    last_writer: Option<usize>,
    readers: Vec<usize>,
}

/// Execution graph of one sequence.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: Vec<Node>,
    footprints: Vec<Footprint>,
    sources: Vec<usize>,
    sinks: Vec<usize>,
    is_sequential: bool,
}

impl ExecutionGraph {
    /// Builds the graph for `sequence`.
    #[must_use]
    pub fn new(sequence: &ThunkSequence, transitive_reduction: bool) -> Self {
        let footprints: Vec<Footprint> = sequence
            .iter()
            .map(|t| Footprint {
                buffers: t.buffer_uses(),
                resources: t.resource_uses(),
            })
            .collect();

        let mut nodes = vec![Node::default(); footprints.len()];
        let mut hazards: HashMap<HazardKey, Hazard> = HashMap::new();
        for (b, footprint) in footprints.iter().enumerate() {
            let mut preds = Vec::new();
            for (key, write) in footprint.accesses() {
                let hazard = hazards.entry(key).or_default();
                preds.extend(hazard.last_writer);
                if write {
                    preds.append(&mut hazard.readers);
                    hazard.last_writer = Some(b);
                } else {
                    hazard.readers.push(b);
                }
            }
            preds.sort_unstable();
            preds.dedup();
            for &a in &preds {
                nodes[a].out_edges.push(b);
            }
            nodes[b].in_edges = preds;
        }
        if transitive_reduction {
            let removed = reduce(&mut nodes);
            trace!(removed, "transitive reduction dropped redundant edges");
        }

        let sources = (0..nodes.len())
            .filter(|&i| nodes[i].in_edges.is_empty())
            .collect();
        let sinks = (0..nodes.len())
            .filter(|&i| nodes[i].out_edges.is_empty())
            .collect();
        let is_sequential = nodes
            .iter()
            .enumerate()
            .skip(1)
            .all(|(i, n)| n.in_edges.contains(&(i - 1)));

        Self {
            nodes,
            footprints,
            sources,
            sinks,
            is_sequential,
        }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true for the graph of an empty sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in program order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Nodes with no predecessors, in program order.
    #[must_use]
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Nodes with no dependents, in program order.
    #[must_use]
    pub fn sinks(&self) -> &[usize] {
        &self.sinks
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.out_edges.len()).sum()
    }

    /// Returns true when every node depends on its predecessor, i.e. the
    /// sequence can only ever run in program order.
    #[must_use]
    pub const fn is_sequential(&self) -> bool {
        self.is_sequential
    }

    /// Returns true if the footprints of nodes `a` and `b` conflict.
    #[must_use]
    pub fn conflicts(&self, a: usize, b: usize) -> bool {
        match (self.footprints.get(a), self.footprints.get(b)) {
            (Some(fa), Some(fb)) => fa.conflicts(fb),
            _ => false,
        }
    }
}

/// Removes every edge implied by a longer path. Returns the number removed.
///
/// A path from `source` to its furthest direct dependent never passes a node
/// beyond it, so each search stops there.
fn reduce(nodes: &mut [Node]) -> usize {
    let mut removed = 0;
    let mut seen = vec![usize::MAX; nodes.len()];
    let mut stack = Vec::new();
    for source in 0..nodes.len() {
        if nodes[source].out_edges.len() < 2 {
            continue;
        }
        let horizon = nodes[source].out_edges.iter().copied().max().unwrap_or(source);
        stack.clear();
        for &child in &nodes[source].out_edges {
            stack.extend(nodes[child].out_edges.iter().copied().filter(|&n| n <= horizon));
        }
        while let Some(node) = stack.pop() {
            if seen[node] == source {
                continue;
            }
            seen[node] = source;
            stack.extend(nodes[node].out_edges.iter().copied().filter(|&n| n <= horizon));
        }

        let (kept, dropped): (Vec<usize>, Vec<usize>) = nodes[source]
            .out_edges
            .iter()
            .copied()
            .partition(|&d| seen[d] != source);
        if dropped.is_empty() {
            continue;
        }
        removed += dropped.len();
        nodes[source].out_edges = kept;
        for target in dropped {
            nodes[target].in_edges.retain(|&p| p != source);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferSlice;
    use crate::resource::{Resource, ResourceKind};
    use crate::thunk::ThunkInfo;
    use crate::thunks::{CopyThunk, RngGetAndUpdateStateThunk};

    fn copy(src: usize, dst: usize) -> CopyThunk {
        CopyThunk::new(
            ThunkInfo::new(format!("copy{src}->{dst}")),
            BufferSlice::new(src, 0, 1),
            BufferSlice::new(dst, 0, 1),
        )
        .expect("copy")
    }

    fn sequence(copies: &[(usize, usize)]) -> ThunkSequence {
        let mut seq = ThunkSequence::empty();
        for &(s, d) in copies {
            seq.push(copy(s, d));
        }
        seq
    }

    #[test]
    fn disjoint_operations_are_independent() {
        let graph = ExecutionGraph::new(&sequence(&[(0, 1), (2, 3), (4, 5)]), true);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.sources(), &[0, 1, 2]);
        assert_eq!(graph.sinks(), &[0, 1, 2]);
        assert!(!graph.is_sequential());
    }

    #[test]
    fn shared_reads_do_not_order() {
        let graph = ExecutionGraph::new(&sequence(&[(0, 1), (0, 2)]), true);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn chain_is_reduced() {
        // 0 -> 1 -> 2 and 0 -> 2 through slot 1 and slot 0
        let seq = sequence(&[(0, 1), (1, 2), (2, 0)]);
        let full = ExecutionGraph::new(&seq, false);
        assert_eq!(full.edge_count(), 3);
        let reduced = ExecutionGraph::new(&seq, true);
        assert_eq!(reduced.edge_count(), 2);
        assert_eq!(reduced.nodes()[2].in_edges, vec![1]);
        assert!(reduced.is_sequential());
        assert!(reduced.conflicts(0, 2));
    }

    #[test]
    fn resources_add_edges() {
        let mut seq = ThunkSequence::empty();
        let a = RngGetAndUpdateStateThunk::new(ThunkInfo::new("a"), BufferSlice::new(0, 0, 16), 1)
            .expect("rng");
        seq.push(a);
        seq.push(copy(3, 4));
        let graph = ExecutionGraph::new(&seq, true);
        assert_eq!(graph.edge_count(), 0);

        let token = Resource::create(ResourceKind::Token);
        let mut feeds = ThunkSequence::empty();
        for i in 0..3 {
            feeds.push(crate::thunks::OutfeedThunk::new(
                ThunkInfo::new(format!("out{i}")),
                vec![BufferSlice::new(i, 0, 1)],
                &token,
            ));
        }
        let graph = ExecutionGraph::new(&feeds, true);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.is_sequential());
    }

    #[test]
    fn readers_since_last_write_all_precede_next_write() {
        // two readers of slot 0, then a writer of slot 0
        let graph = ExecutionGraph::new(&sequence(&[(0, 1), (0, 2), (3, 0)]), true);
        assert_eq!(graph.nodes()[2].in_edges, vec![0, 1]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn long_token_chain_builds_linear_graph() {
        let token = Resource::create(ResourceKind::Token);
        let mut feeds = ThunkSequence::empty();
        for i in 0..20_000 {
            feeds.push(crate::thunks::InfeedThunk::new(
                ThunkInfo::new(format!("in{i}")),
                vec![BufferSlice::new(i, 0, 1)],
                &token,
            ));
        }
        for reduction in [false, true] {
            let graph = ExecutionGraph::new(&feeds, reduction);
            assert_eq!(graph.edge_count(), 19_999);
            assert!(graph.is_sequential());
            assert_eq!(graph.sources(), &[0]);
            assert_eq!(graph.sinks(), &[19_999]);
        }
    }

    #[test]
    fn empty_sequence() {
        let graph = ExecutionGraph::new(&ThunkSequence::empty(), true);
        assert!(graph.is_empty());
        assert!(graph.is_sequential());
    }
}
