//! # Alignment Search Paths
//!
//! The mutable candidate record the path finder extends through the
//! haplotype index, and the immutable `AlignmentPath` it collapses to
//! once a traversal is complete.

use std::collections::HashMap;

use crate::index::{PathIndex, SearchState};
use crate::data::NodeHandle;
use crate::math::phred_to_prob;
use crate::model::read_stats::ReadAlignmentStats;

/// Score ties are resolved at fixed precision rather than the platform
/// epsilon.
pub const MAX_SCORE_DIFF: f64 = 1e-8;

/// A candidate path through the graph being extended along an
/// alignment.
#[derive(Debug, Clone, Default)]
pub struct AlignmentSearchPath {
    /// Node handles visited so far.
    pub path: Vec<NodeHandle>,
    /// Offset within the first node.
    pub start_offset: u32,
    /// Offset within the last node.
    pub end_offset: u32,
    /// Haplotypes consistent with `path`.
    pub search: SearchState,
    /// Fragment accounting between mates; negative on overlap.
    pub insert_length: i32,
    /// One entry for a single read, two after a mate merge.
    pub read_stats: Vec<ReadAlignmentStats>,
}

impl AlignmentSearchPath {
    /// A search path is empty once it has no path or no consistent
    /// haplotypes.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() || self.search.is_empty()
    }

    /// Drop the path and haplotype state, leaving read statistics in
    /// place. A cleared search path is terminal.
    pub fn clear(&mut self) {
        self.path.clear();
        self.search = SearchState::default();
    }

    /// Probability that at least one read in the fragment is wrongly
    /// mapped. A mapping quality of zero makes the whole fragment
    /// uninformative.
    pub fn mapq_prob(&self) -> f64 {
        let mut prob = 1.0;

        for stats in &self.read_stats {
            if stats.mapq > 0 {
                prob *= 1.0 - phred_to_prob(stats.mapq);
            } else {
                return 1.0;
            }
        }

        1.0 - prob
    }

    pub fn score_sum(&self) -> i32 {
        self.read_stats.iter().map(|stats| stats.score).sum()
    }

    pub fn min_mapq(&self) -> u32 {
        self.read_stats
            .iter()
            .map(|stats| stats.mapq)
            .min()
            .unwrap_or(0)
    }

    pub fn min_best_score_fraction(&self) -> f64 {
        self.read_stats
            .iter()
            .map(ReadAlignmentStats::best_score_fraction)
            .fold(1.0, f64::min)
    }

    pub fn max_softclip_fraction(&self) -> f64 {
        self.read_stats
            .iter()
            .map(ReadAlignmentStats::softclip_fraction)
            .fold(0.0, f64::max)
    }

    /// Unaligned slack of the fragment measurement: soft-clips plus
    /// active internal offsets over all reads.
    pub fn unaligned_slack(&self) -> u32 {
        self.read_stats
            .iter()
            .map(|stats| stats.clipped_offset_left_bases() + stats.clipped_offset_right_bases())
            .sum()
    }

    /// Fragment length on the graph: aligned read bases plus the
    /// inter-mate insert (which is negative when the mates overlap).
    pub fn fragment_length(&self) -> u32 {
        let aligned: i64 = self
            .read_stats
            .iter()
            .map(|stats| i64::from(stats.aligned_length()))
            .sum();

        (aligned + i64::from(self.insert_length)).max(0) as u32
    }

    /// Ordering key used to sort and deduplicate candidate paths
    /// before pairing.
    pub fn dedup_key(&self) -> (Vec<NodeHandle>, u32, u32, i32) {
        (
            self.path.clone(),
            self.start_offset,
            self.end_offset,
            self.insert_length,
        )
    }
}

/// A finished candidate: one fragment placement consistent with a set
/// of reference paths.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentPath {
    pub frag_length: u32,
    /// Probability the fragment is wrongly mapped.
    pub mapq_prob: f64,
    pub score_sum: i32,
    /// Unaligned measurement slack carried over from the search path.
    pub slack: u32,
    /// Sorted, deduplicated reference path ids.
    pub ids: Vec<u32>,
}

impl AlignmentPath {
    /// Collapse completed search paths into alignment paths, grouped
    /// by their located path-id set.
    ///
    /// Within a group only the best-scoring candidate survives (ties
    /// at `MAX_SCORE_DIFF` keep the first). Disconnected alignments
    /// carry deliberately split subpath chains whose scores are not
    /// comparable, so for them every distinct candidate is kept.
    pub fn from_search_paths(
        search_paths: &[AlignmentSearchPath],
        index: &PathIndex,
        is_disconnected: bool,
    ) -> Vec<AlignmentPath> {
        let mut grouped: HashMap<Vec<u32>, Vec<AlignmentPath>> = HashMap::new();

        for search_path in search_paths {
            if search_path.is_empty() {
                continue;
            }

            debug_assert_eq!(search_path.search.node, search_path.path.last().copied());

            let ids = index.locate_path_ids(&search_path.search);
            if ids.is_empty() {
                continue;
            }

            let candidate = AlignmentPath {
                frag_length: search_path.fragment_length(),
                mapq_prob: search_path.mapq_prob(),
                score_sum: search_path.score_sum(),
                slack: search_path.unaligned_slack(),
                ids,
            };

            let group = grouped.entry(candidate.ids.clone()).or_default();

            if is_disconnected {
                if !group.contains(&candidate) {
                    group.push(candidate);
                }
            } else {
                match group.first_mut() {
                    Some(best) => {
                        if f64::from(candidate.score_sum)
                            > f64::from(best.score_sum) + MAX_SCORE_DIFF
                        {
                            *best = candidate;
                        }
                    }
                    None => group.push(candidate),
                }
            }
        }

        let mut align_paths: Vec<AlignmentPath> = grouped.into_values().flatten().collect();
        align_paths.sort_by(|a, b| {
            a.ids
                .cmp(&b.ids)
                .then(a.score_sum.cmp(&b.score_sum))
                .then(a.frag_length.cmp(&b.frag_length))
        });

        align_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn make_test_index() -> PathIndex {
        let node_lengths: StdHashMap<u64, u32> = (1..=3).map(|id| (id, 10)).collect();
        PathIndex::new(
            node_lengths,
            vec![
                (0, vec![NodeHandle::forward(1), NodeHandle::forward(2)]),
                (1, vec![NodeHandle::forward(1), NodeHandle::forward(3)]),
            ],
            false,
        )
        .unwrap()
    }

    fn make_search_path(index: &PathIndex, nodes: &[u64], mapq: u32, score: i32) -> AlignmentSearchPath {
        let mut search_path = AlignmentSearchPath::default();

        for &id in nodes {
            let handle = NodeHandle::forward(id);
            search_path.search = if search_path.path.is_empty() {
                index.find(handle)
            } else {
                index.extend(&search_path.search, handle)
            };
            search_path.path.push(handle);
        }

        let mut stats = ReadAlignmentStats::new(mapq, score);
        stats.length = 20;
        stats.left_softclip = (0, true);
        stats.right_softclip = (0, true);
        search_path.read_stats.push(stats);
        search_path.end_offset = 10;

        search_path
    }

    #[test]
    fn test_mapq_prob() {
        let index = make_test_index();

        let mut search_path = make_search_path(&index, &[1, 2], 10, 20);
        assert!((search_path.mapq_prob() - 0.1).abs() < 1e-12);

        // Paired: probability either read is wrong.
        search_path
            .read_stats
            .push(ReadAlignmentStats::new(10, 20));
        assert!((search_path.mapq_prob() - 0.19).abs() < 1e-12);

        // Zero mapq dominates.
        search_path.read_stats[0].mapq = 0;
        assert_eq!(search_path.mapq_prob(), 1.0);
    }

    #[test]
    fn test_conversion_groups_by_id_set() {
        let index = make_test_index();

        let search_paths = vec![
            make_search_path(&index, &[1, 2], 60, 20),
            make_search_path(&index, &[1, 3], 60, 18),
            make_search_path(&index, &[1, 2], 60, 15),
        ];

        let align_paths = AlignmentPath::from_search_paths(&search_paths, &index, false);

        assert_eq!(align_paths.len(), 2);
        assert_eq!(align_paths[0].ids, vec![0]);
        assert_eq!(align_paths[0].score_sum, 20);
        assert_eq!(align_paths[1].ids, vec![1]);
        assert_eq!(align_paths[1].score_sum, 18);
    }

    #[test]
    fn test_conversion_skips_empty() {
        let index = make_test_index();

        let mut cleared = make_search_path(&index, &[1, 2], 60, 20);
        cleared.clear();

        let align_paths = AlignmentPath::from_search_paths(&[cleared], &index, false);
        assert!(align_paths.is_empty());
    }

    #[test]
    fn test_disconnected_keeps_all_candidates() {
        let index = make_test_index();

        let search_paths = vec![
            make_search_path(&index, &[1, 2], 60, 20),
            make_search_path(&index, &[1, 2], 60, 15),
        ];

        let connected = AlignmentPath::from_search_paths(&search_paths, &index, false);
        let disconnected = AlignmentPath::from_search_paths(&search_paths, &index, true);

        assert_eq!(connected.len(), 1);
        assert_eq!(disconnected.len(), 2);
    }
}
