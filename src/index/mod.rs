//! # Haplotype Path Index
//!
//! An immutable in-memory index over haplotype node sequences with the
//! search-state contract the path finder needs: `find` starts a fresh
//! search on one node, `extend` continues every matching haplotype by
//! one node (longest-prefix continuation), `edges` enumerates the
//! successors of a node over all haplotypes, and `locate_path_ids`
//! resolves a search state to the deduplicated set of path ids.
//!
//! A state's size counts haplotype *occurrences*, so a haplotype that
//! visits the current node twice contributes two. `locate_path_ids`
//! deduplicates; the finder uses the gap between the two to detect
//! cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::data::NodeHandle;
use crate::error::{QuantError, Result};

/// One outgoing edge of a node, aggregated over haplotypes.
///
/// `node == None` is the sequence-end sentinel; it sorts first, the way
/// the end marker leads successor lists in GBWT records. The first real
/// edge is the primary continuation of the finder's DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: Option<NodeHandle>,
    pub count: u32,
}

/// A set of haplotype occurrences consistent with a walked node
/// sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    /// Node the state currently sits on; `None` before the first find.
    pub node: Option<NodeHandle>,
    /// (haplotype sequence index, position of `node` within it).
    occurrences: Vec<(u32, u32)>,
}

impl SearchState {
    /// Number of consistent haplotype occurrences.
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

/// Immutable haplotype path index shared read-only across threads.
#[derive(Debug, Clone)]
pub struct PathIndex {
    node_lengths: HashMap<u64, u32>,
    /// Stored haplotype node sequences (both orientations when
    /// bidirectional).
    sequences: Vec<Vec<NodeHandle>>,
    /// Path id of each stored sequence.
    sequence_path_ids: Vec<u32>,
    /// Node -> sorted occurrence list over all stored sequences.
    occurrences: HashMap<NodeHandle, Vec<(u32, u32)>>,
    /// Node -> aggregated successor list, end sentinel first.
    edges: HashMap<NodeHandle, Vec<Edge>>,
    bidirectional: bool,
}

impl PathIndex {
    /// Build an index from `(path_id, node sequence)` pairs. When
    /// `bidirectional` is set each sequence is also stored in its
    /// reverse orientation, so callers must not reverse-complement
    /// alignments themselves.
    pub fn new(
        node_lengths: HashMap<u64, u32>,
        paths: Vec<(u32, Vec<NodeHandle>)>,
        bidirectional: bool,
    ) -> Result<Self> {
        let mut sequences = Vec::with_capacity(paths.len() * if bidirectional { 2 } else { 1 });
        let mut sequence_path_ids = Vec::with_capacity(sequences.capacity());

        for (path_id, nodes) in paths {
            if nodes.is_empty() {
                return Err(QuantError::invalid_data(format!(
                    "path {path_id} has an empty node sequence"
                )));
            }
            for node in &nodes {
                if !node_lengths.contains_key(&node.id()) {
                    return Err(QuantError::invalid_data(format!(
                        "path {path_id} references unknown node {}",
                        node.id()
                    )));
                }
            }

            if bidirectional {
                let reversed: Vec<NodeHandle> =
                    nodes.iter().rev().map(|node| node.reverse()).collect();
                sequences.push(reversed);
                sequence_path_ids.push(path_id);
            }

            sequences.push(nodes);
            sequence_path_ids.push(path_id);
        }

        let mut occurrences: HashMap<NodeHandle, Vec<(u32, u32)>> = HashMap::new();
        let mut successors: HashMap<NodeHandle, BTreeMap<Option<NodeHandle>, u32>> = HashMap::new();

        for (seq_idx, sequence) in sequences.iter().enumerate() {
            for (pos, &node) in sequence.iter().enumerate() {
                occurrences
                    .entry(node)
                    .or_default()
                    .push((seq_idx as u32, pos as u32));

                let next = sequence.get(pos + 1).copied();
                *successors.entry(node).or_default().entry(next).or_insert(0) += 1;
            }
        }

        // BTreeMap ordering puts the None sentinel first and real
        // successors in handle order after it.
        let edges = successors
            .into_iter()
            .map(|(node, nexts)| {
                let list = nexts
                    .into_iter()
                    .map(|(next, count)| Edge { node: next, count })
                    .collect();
                (node, list)
            })
            .collect();

        Ok(Self {
            node_lengths,
            sequences,
            sequence_path_ids,
            occurrences,
            edges,
            bidirectional,
        })
    }

    pub fn node_length(&self, id: u64) -> u32 {
        self.node_lengths.get(&id).copied().unwrap_or(0)
    }

    pub fn has_node(&self, id: u64) -> bool {
        self.node_lengths.contains_key(&id)
    }

    /// Whether both strands are stored in the index.
    pub fn bidirectional(&self) -> bool {
        self.bidirectional
    }

    /// Number of distinct path ids in the index.
    pub fn path_count(&self) -> usize {
        self.sequence_path_ids
            .iter()
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Start a fresh search on `node`.
    pub fn find(&self, node: NodeHandle) -> SearchState {
        SearchState {
            node: Some(node),
            occurrences: self.occurrences.get(&node).cloned().unwrap_or_default(),
        }
    }

    /// Continue every occurrence in `state` that is followed by `node`.
    /// May yield an empty state.
    pub fn extend(&self, state: &SearchState, node: NodeHandle) -> SearchState {
        if state.node.is_none() {
            return self.find(node);
        }

        let occurrences = state
            .occurrences
            .iter()
            .filter_map(|&(seq_idx, pos)| {
                let sequence = &self.sequences[seq_idx as usize];
                match sequence.get(pos as usize + 1) {
                    Some(&next) if next == node => Some((seq_idx, pos + 1)),
                    _ => None,
                }
            })
            .collect();

        SearchState {
            node: Some(node),
            occurrences,
        }
    }

    /// Successor edges of `node`, end sentinel first.
    pub fn edges(&self, node: NodeHandle) -> &[Edge] {
        self.edges.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Deduplicated, sorted path ids consistent with `state`. Strictly
    /// fewer than `state.len()` when a haplotype visits the current
    /// node more than once.
    pub fn locate_path_ids(&self, state: &SearchState) -> Vec<u32> {
        let ids: BTreeSet<u32> = state
            .occurrences
            .iter()
            .map(|&(seq_idx, _)| self.sequence_path_ids[seq_idx as usize])
            .collect();

        ids.into_iter().collect()
    }
}

/// Serde-friendly index description consumed by the binary. Nodes are
/// signed: negative means reverse orientation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathIndexDef {
    pub node_lengths: Vec<(u64, u32)>,
    pub paths: Vec<PathDef>,
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathDef {
    pub path_id: u32,
    pub nodes: Vec<i64>,
}

impl PathIndexDef {
    pub fn build(self) -> Result<PathIndex> {
        let node_lengths = self.node_lengths.into_iter().collect();
        let paths = self
            .paths
            .into_iter()
            .map(|p| {
                let nodes = p
                    .nodes
                    .iter()
                    .map(|&v| NodeHandle::new(v.unsigned_abs(), v < 0))
                    .collect();
                (p.path_id, nodes)
            })
            .collect();

        PathIndex::new(node_lengths, paths, self.bidirectional)
    }
}
