//! # Alignment Representations
//!
//! A uniform view over single-path and multipath (subpath DAG)
//! alignments: one tagged enum with dispatch methods for the handful
//! of operations the path finder needs.

use serde::{Deserialize, Serialize};

use crate::data::node::NodeHandle;
use crate::error::{QuantError, Result};

/// One aligned stretch on a single node.
///
/// With edit structure flattened away, a boundary mapping's read-only
/// overhang (`to_length - from_length`) is its soft-clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub node: NodeHandle,
    /// Offset within the node where the aligned stretch starts.
    pub offset: u32,
    /// Graph bases consumed.
    pub from_length: u32,
    /// Read bases consumed.
    pub to_length: u32,
}

impl Mapping {
    /// Read-only overhang of this mapping.
    #[inline]
    pub fn overhang(&self) -> u32 {
        self.to_length.saturating_sub(self.from_length)
    }
}

/// An ordered sequence of mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedPath {
    pub mappings: Vec<Mapping>,
}

impl MappedPath {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self { mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Read bases consumed by the whole path.
    pub fn to_length(&self) -> u32 {
        self.mappings.iter().map(|m| m.to_length).sum()
    }

    /// Soft-clip length at the read start of this path.
    pub fn left_softclip(&self) -> u32 {
        self.mappings.first().map_or(0, Mapping::overhang)
    }

    /// Soft-clip length at the read end of this path.
    pub fn right_softclip(&self) -> u32 {
        self.mappings.last().map_or(0, Mapping::overhang)
    }

    /// Reverse-complement the path: mapping order flips and each
    /// mapping is re-anchored from the other end of its node.
    pub fn reverse_complement(&self, node_length: impl Fn(u64) -> u32) -> Self {
        let mappings = self
            .mappings
            .iter()
            .rev()
            .map(|m| {
                let len = node_length(m.node.id());
                debug_assert!(m.offset + m.from_length <= len);

                Mapping {
                    node: m.node.reverse(),
                    offset: len - (m.offset + m.from_length),
                    from_length: m.from_length,
                    to_length: m.to_length,
                }
            })
            .collect();

        Self { mappings }
    }
}

/// One subpath of a multipath alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subpath {
    pub path: MappedPath,
    pub score: i32,
    /// Subpaths this one continues into.
    #[serde(default)]
    pub nexts: Vec<u32>,
    /// Deliberate disconnections: traversal ends here without emission.
    #[serde(default)]
    pub connections: Vec<u32>,
}

impl Subpath {
    /// A subpath with outgoing `next` edges is not a traversal end.
    pub fn is_end(&self) -> bool {
        self.nexts.is_empty()
    }
}

/// A read alignment, either a single mapping sequence or a DAG of
/// subpaths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Single {
        path: MappedPath,
        sequence_length: u32,
        mapping_quality: u32,
        score: i32,
        #[serde(default)]
        quality: Option<Vec<u8>>,
    },
    Multipath {
        subpaths: Vec<Subpath>,
        /// Indices of the subpaths a traversal may start from.
        starts: Vec<u32>,
        sequence_length: u32,
        mapping_quality: u32,
        #[serde(default)]
        disconnected: bool,
        #[serde(default)]
        quality: Option<Vec<u8>>,
    },
}

impl Alignment {
    pub fn sequence_length(&self) -> u32 {
        match self {
            Self::Single { sequence_length, .. } | Self::Multipath { sequence_length, .. } => {
                *sequence_length
            }
        }
    }

    pub fn mapping_quality(&self) -> u32 {
        match self {
            Self::Single {
                mapping_quality, ..
            }
            | Self::Multipath {
                mapping_quality, ..
            } => *mapping_quality,
        }
    }

    /// Whether the alignment carries any mappings at all.
    pub fn has_path(&self) -> bool {
        match self {
            Self::Single { path, .. } => !path.is_empty(),
            Self::Multipath { subpaths, .. } => !subpaths.is_empty(),
        }
    }

    /// The alignment is marked as a deliberately disconnected subpath
    /// chain. Single-path alignments are never disconnected.
    pub fn is_disconnected(&self) -> bool {
        match self {
            Self::Single { .. } => false,
            Self::Multipath { disconnected, .. } => *disconnected,
        }
    }

    /// First node of every possible traversal start.
    pub fn start_nodes(&self) -> Vec<NodeHandle> {
        match self {
            Self::Single { path, .. } => {
                path.mappings.first().map(|m| m.node).into_iter().collect()
            }
            Self::Multipath {
                subpaths, starts, ..
            } => starts
                .iter()
                .filter_map(|&idx| {
                    subpaths
                        .get(idx as usize)
                        .and_then(|sp| sp.path.mappings.first())
                        .map(|m| m.node)
                })
                .collect(),
        }
    }

    /// Largest soft-clip over all traversal starts.
    pub fn max_start_softclip(&self) -> u32 {
        match self {
            Self::Single { path, .. } => path.left_softclip(),
            Self::Multipath {
                subpaths, starts, ..
            } => starts
                .iter()
                .filter_map(|&idx| subpaths.get(idx as usize))
                .map(|sp| sp.path.left_softclip())
                .max()
                .unwrap_or(0),
        }
    }

    /// Largest soft-clip over all traversal ends.
    pub fn max_end_softclip(&self) -> u32 {
        match self {
            Self::Single { path, .. } => path.right_softclip(),
            Self::Multipath { subpaths, .. } => subpaths
                .iter()
                .filter(|sp| sp.is_end())
                .map(|sp| sp.path.right_softclip())
                .max()
                .unwrap_or(0),
        }
    }

    /// Check the structural invariants input validation relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sequence_length() == 0 {
            return Err(QuantError::invalid_data("alignment sequence length is zero"));
        }

        if let Some(quality) = match self {
            Self::Single { quality, .. } | Self::Multipath { quality, .. } => quality.as_ref(),
        } {
            if quality.len() != self.sequence_length() as usize {
                return Err(QuantError::invalid_data(format!(
                    "quality string length {} does not match sequence length {}",
                    quality.len(),
                    self.sequence_length()
                )));
            }
        }

        if let Self::Multipath {
            subpaths, starts, ..
        } = self
        {
            if starts.is_empty() && !subpaths.is_empty() {
                return Err(QuantError::invalid_data("multipath alignment without starts"));
            }

            let n = subpaths.len() as u32;
            let in_range = |idx: &u32| *idx < n;

            if !starts.iter().all(in_range)
                || !subpaths
                    .iter()
                    .all(|sp| sp.nexts.iter().all(in_range) && sp.connections.iter().all(in_range))
            {
                return Err(QuantError::invalid_data("subpath index out of range"));
            }
        }

        Ok(())
    }

    /// Reverse-complement the alignment. For multipath alignments the
    /// subpath DAG is reversed as well: former traversal ends become
    /// starts and every edge flips direction.
    pub fn reverse_complement(&self, node_length: impl Fn(u64) -> u32) -> Self {
        match self {
            Self::Single {
                path,
                sequence_length,
                mapping_quality,
                score,
                quality,
            } => Self::Single {
                path: path.reverse_complement(node_length),
                sequence_length: *sequence_length,
                mapping_quality: *mapping_quality,
                score: *score,
                quality: quality.as_ref().map(|q| q.iter().rev().copied().collect()),
            },
            Self::Multipath {
                subpaths,
                sequence_length,
                mapping_quality,
                disconnected,
                quality,
                ..
            } => {
                let n = subpaths.len() as u32;
                let flip = |idx: u32| n - 1 - idx;

                let mut rc_subpaths: Vec<Subpath> = subpaths
                    .iter()
                    .rev()
                    .map(|sp| Subpath {
                        path: sp.path.reverse_complement(&node_length),
                        score: sp.score,
                        nexts: Vec::new(),
                        connections: Vec::new(),
                    })
                    .collect();

                for (idx, sp) in subpaths.iter().enumerate() {
                    for &next in &sp.nexts {
                        rc_subpaths[flip(next) as usize].nexts.push(flip(idx as u32));
                    }
                    for &conn in &sp.connections {
                        rc_subpaths[flip(conn) as usize]
                            .connections
                            .push(flip(idx as u32));
                    }
                }

                // Former ends are the new starts.
                let starts = subpaths
                    .iter()
                    .enumerate()
                    .filter(|(_, sp)| sp.is_end())
                    .map(|(idx, _)| flip(idx as u32))
                    .collect();

                Self::Multipath {
                    subpaths: rc_subpaths,
                    starts,
                    sequence_length: *sequence_length,
                    mapping_quality: *mapping_quality,
                    disconnected: *disconnected,
                    quality: quality.as_ref().map(|q| q.iter().rev().copied().collect()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(node_id: u64, offset: u32, from_length: u32, to_length: u32) -> Mapping {
        Mapping {
            node: NodeHandle::forward(node_id),
            offset,
            from_length,
            to_length,
        }
    }

    #[test]
    fn test_softclip_reification() {
        let path = MappedPath::new(vec![mapping(1, 5, 10, 14), mapping(2, 0, 20, 20)]);

        assert_eq!(path.left_softclip(), 4);
        assert_eq!(path.right_softclip(), 0);
        assert_eq!(path.to_length(), 34);
    }

    #[test]
    fn test_single_reverse_complement() {
        let aln = Alignment::Single {
            path: MappedPath::new(vec![mapping(1, 5, 10, 10), mapping(2, 0, 8, 8)]),
            sequence_length: 18,
            mapping_quality: 60,
            score: 18,
            quality: None,
        };

        let rc = aln.reverse_complement(|id| if id == 1 { 20 } else { 8 });

        let Alignment::Single { path, .. } = &rc else {
            panic!("variant changed")
        };
        assert_eq!(path.mappings.len(), 2);
        assert_eq!(path.mappings[0].node, NodeHandle::new(2, true));
        assert_eq!(path.mappings[0].offset, 0);
        assert_eq!(path.mappings[1].node, NodeHandle::new(1, true));
        assert_eq!(path.mappings[1].offset, 5);

        // Round trip restores the original.
        let back = rc.reverse_complement(|id| if id == 1 { 20 } else { 8 });
        assert_eq!(back, aln);
    }

    #[test]
    fn test_multipath_reverse_complement_flips_dag() {
        let aln = Alignment::Multipath {
            subpaths: vec![
                Subpath {
                    path: MappedPath::new(vec![mapping(1, 0, 5, 5)]),
                    score: 5,
                    nexts: vec![1, 2],
                    connections: vec![],
                },
                Subpath {
                    path: MappedPath::new(vec![mapping(2, 0, 5, 5)]),
                    score: 5,
                    nexts: vec![],
                    connections: vec![],
                },
                Subpath {
                    path: MappedPath::new(vec![mapping(3, 0, 5, 5)]),
                    score: 4,
                    nexts: vec![],
                    connections: vec![],
                },
            ],
            starts: vec![0],
            sequence_length: 10,
            mapping_quality: 60,
            disconnected: false,
            quality: None,
        };

        let rc = aln.reverse_complement(|_| 5);
        let Alignment::Multipath {
            subpaths, starts, ..
        } = &rc
        else {
            panic!("variant changed")
        };

        // Old ends (1 and 2) become the new starts (flipped to 1 and 0).
        let mut sorted_starts = starts.clone();
        sorted_starts.sort();
        assert_eq!(sorted_starts, vec![0, 1]);

        // Old start becomes the single end.
        assert!(subpaths[2].is_end());
        assert_eq!(subpaths[0].nexts, vec![2]);
        assert_eq!(subpaths[1].nexts, vec![2]);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let aln = Alignment::Single {
            path: MappedPath::new(vec![mapping(1, 0, 5, 5)]),
            sequence_length: 0,
            mapping_quality: 60,
            score: 5,
            quality: None,
        };
        assert!(aln.validate().is_err());

        let aln = Alignment::Multipath {
            subpaths: vec![Subpath {
                path: MappedPath::new(vec![mapping(1, 0, 5, 5)]),
                score: 5,
                nexts: vec![7],
                connections: vec![],
            }],
            starts: vec![0],
            sequence_length: 5,
            mapping_quality: 60,
            disconnected: false,
            quality: None,
        };
        assert!(aln.validate().is_err());
    }
}
