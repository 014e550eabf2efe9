//! # Read Path Probabilities
//!
//! The per-read sparse probability vector over cluster paths plus a
//! noise scalar. Probabilities are quantized to the configured
//! precision so identical vectors from duplicate reads collapse into
//! one row with a summed read count.

use std::collections::{BTreeMap, HashMap};

use crate::data::PathInfo;
use crate::math::{log_sum_exp, FragmentLengthDist};
use crate::model::search_path::AlignmentPath;

/// Sparse per-read probability distribution over cluster paths.
///
/// Probabilities are keyed by their quantized value, so paths with
/// equal probability share one entry; ids within an entry stay sorted.
#[derive(Debug, Clone)]
pub struct ReadPathProbabilities {
    read_count: u32,
    /// Quantized noise probability, in units of `prob_precision`.
    noise_key: u64,
    /// Quantized probability -> sorted cluster-local path columns.
    path_probs: BTreeMap<u64, Vec<u32>>,
}

impl ReadPathProbabilities {
    /// A pure-noise read.
    pub fn noise(read_count: u32, prob_precision: f64) -> Self {
        Self {
            read_count,
            noise_key: quantize(1.0, prob_precision),
            path_probs: BTreeMap::new(),
        }
    }

    /// Compute the probability vector for one read (or read pair) from
    /// its alignment paths.
    ///
    /// The shared mapping quality gives the noise probability; the
    /// remaining mass is distributed over located paths in proportion
    /// to `exp(score_log_base * score + fragment length log-prob)`,
    /// with the fragment term corrected for the path's length and the
    /// measurement slack for paired reads.
    #[allow(clippy::too_many_arguments)]
    pub fn from_alignment_paths(
        align_paths: &[AlignmentPath],
        cluster_path_index: &HashMap<u32, usize>,
        paths: &[PathInfo],
        frag_dist: &FragmentLengthDist,
        is_single_end: bool,
        score_log_base: f64,
        prob_precision: f64,
    ) -> Self {
        let mut result = Self::noise(1, prob_precision);

        let Some(first) = align_paths.first() else {
            return result;
        };

        let noise_prob = first.mapq_prob;
        if noise_prob + prob_precision >= 1.0 {
            return result;
        }

        // Per-column log weights; a column hit by several alignment
        // paths accumulates in probability space below.
        let mut column_log_weights: Vec<(usize, f64)> = Vec::new();

        for align_path in align_paths {
            debug_assert!((align_path.mapq_prob - noise_prob).abs() < 1e-9);

            let log_weight = score_log_base * f64::from(align_path.score_sum)
                + if is_single_end {
                    0.0
                } else {
                    let frag_length = align_path.frag_length;
                    align_path
                        .ids
                        .iter()
                        .filter_map(|id| cluster_path_index.get(id))
                        .map(|&col| {
                            frag_dist.log_prob_fitted(
                                frag_length,
                                paths[col].length,
                                align_path.slack,
                            )
                        })
                        .fold(f64::NEG_INFINITY, f64::max)
                };

            for id in &align_path.ids {
                if let Some(&col) = cluster_path_index.get(id) {
                    column_log_weights.push((col, log_weight));
                }
            }
        }

        if column_log_weights.is_empty() {
            return result;
        }

        let log_weights: Vec<f64> = column_log_weights.iter().map(|&(_, lw)| lw).collect();
        let norm = log_sum_exp(&log_weights);

        if !norm.is_finite() {
            return result;
        }

        let mut column_probs: BTreeMap<u32, f64> = BTreeMap::new();
        for &(col, log_weight) in &column_log_weights {
            *column_probs.entry(col as u32).or_insert(0.0) +=
                (1.0 - noise_prob) * (log_weight - norm).exp();
        }

        result.noise_key = quantize(noise_prob, prob_precision);
        for (col, prob) in column_probs {
            let key = quantize(prob, prob_precision);
            if key > 0 {
                result.path_probs.entry(key).or_default().push(col);
            }
        }

        result
    }

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    pub fn add_read_count(&mut self, count: u32) {
        self.read_count += count;
    }

    pub fn noise_prob(&self, prob_precision: f64) -> f64 {
        self.noise_key as f64 * prob_precision
    }

    /// Iterate `(probability, sorted path columns)` entries.
    pub fn collapsed_probs(
        &self,
        prob_precision: f64,
    ) -> impl Iterator<Item = (f64, &[u32])> + '_ {
        self.path_probs
            .iter()
            .map(move |(&key, cols)| (key as f64 * prob_precision, cols.as_slice()))
    }

    /// Number of paths with non-zero probability.
    pub fn num_paths(&self) -> usize {
        self.path_probs.values().map(Vec::len).sum()
    }

    /// The collapse fingerprint: everything but the read count.
    fn fingerprint(&self) -> (u64, &BTreeMap<u64, Vec<u32>>) {
        (self.noise_key, &self.path_probs)
    }
}

/// Two probability vectors are identical when their quantized noise
/// and path probabilities match; the read count is collapse state, not
/// identity.
impl PartialEq for ReadPathProbabilities {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for ReadPathProbabilities {}

fn quantize(prob: f64, prob_precision: f64) -> u64 {
    debug_assert!(prob >= -prob_precision);
    (prob / prob_precision).round().max(0.0) as u64
}

/// Merge identical probability vectors by summing their read counts.
/// Order of first occurrence is preserved.
pub fn collapse_probabilities(probs: Vec<ReadPathProbabilities>) -> Vec<ReadPathProbabilities> {
    let mut collapsed: Vec<ReadPathProbabilities> = Vec::with_capacity(probs.len());
    let mut seen: HashMap<(u64, BTreeMap<u64, Vec<u32>>), usize> = HashMap::new();

    for prob in probs {
        let (noise_key, path_probs) = prob.fingerprint();
        let key = (noise_key, path_probs.clone());

        match seen.get(&key) {
            Some(&idx) => collapsed[idx].add_read_count(prob.read_count()),
            None => {
                seen.insert(key, collapsed.len());
                collapsed.push(prob);
            }
        }
    }

    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRECISION: f64 = 1e-8;

    fn make_test_paths(n: usize) -> (Vec<PathInfo>, HashMap<u32, usize>) {
        let paths = (0..n)
            .map(|i| PathInfo {
                name: format!("path_{}", i),
                length: 1000,
                effective_length: 900.0,
                source_ids: vec![i as u32],
                group_id: i as u32,
                source_count: 1,
            })
            .collect();
        let index = (0..n).map(|i| (i as u32 + 100, i)).collect();

        (paths, index)
    }

    fn make_align_path(ids: Vec<u32>, score: i32, mapq_prob: f64) -> AlignmentPath {
        AlignmentPath {
            frag_length: 300,
            mapq_prob,
            score_sum: score,
            slack: 0,
            ids,
        }
    }

    fn frag_dist() -> FragmentLengthDist {
        FragmentLengthDist::new(300.0, 50.0).unwrap()
    }

    #[test]
    fn test_no_alignment_paths_is_noise() {
        let (paths, index) = make_test_paths(2);
        let probs = ReadPathProbabilities::from_alignment_paths(
            &[],
            &index,
            &paths,
            &frag_dist(),
            true,
            1.0,
            PRECISION,
        );

        assert!((probs.noise_prob(PRECISION) - 1.0).abs() < PRECISION);
        assert_eq!(probs.num_paths(), 0);
    }

    #[test]
    fn test_equal_scores_share_a_probability_key() {
        let (paths, index) = make_test_paths(2);
        let align_paths = vec![
            make_align_path(vec![100], 20, 1e-4),
            make_align_path(vec![101], 20, 1e-4),
        ];

        let probs = ReadPathProbabilities::from_alignment_paths(
            &align_paths,
            &index,
            &paths,
            &frag_dist(),
            true,
            1.0,
            PRECISION,
        );

        let entries: Vec<(f64, Vec<u32>)> = probs
            .collapsed_probs(PRECISION)
            .map(|(p, ids)| (p, ids.to_vec()))
            .collect();

        // One shared key holding both columns, each close to 0.5.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, vec![0, 1]);
        assert!((entries[0].0 - 0.5).abs() < 1e-3);

        // Noise plus path mass stays within one.
        let total: f64 = probs.collapsed_probs(PRECISION).map(|(p, ids)| p * ids.len() as f64).sum();
        assert!(total + probs.noise_prob(PRECISION) <= 1.0 + PRECISION);
    }

    #[test]
    fn test_zero_mapq_is_pure_noise() {
        let (paths, index) = make_test_paths(1);
        let align_paths = vec![make_align_path(vec![100], 20, 1.0)];

        let probs = ReadPathProbabilities::from_alignment_paths(
            &align_paths,
            &index,
            &paths,
            &frag_dist(),
            true,
            1.0,
            PRECISION,
        );

        assert!((probs.noise_prob(PRECISION) - 1.0).abs() < PRECISION);
        assert_eq!(probs.num_paths(), 0);
    }

    #[test]
    fn test_score_differences_shift_mass() {
        let (paths, index) = make_test_paths(2);
        let align_paths = vec![
            make_align_path(vec![100], 20, 1e-4),
            make_align_path(vec![101], 10, 1e-4),
        ];

        let probs = ReadPathProbabilities::from_alignment_paths(
            &align_paths,
            &index,
            &paths,
            &frag_dist(),
            true,
            1.0,
            PRECISION,
        );

        let entries: Vec<(f64, Vec<u32>)> = probs
            .collapsed_probs(PRECISION)
            .map(|(p, ids)| (p, ids.to_vec()))
            .collect();

        assert_eq!(entries.len(), 2);
        // BTreeMap iterates keys ascending: low-probability entry first.
        assert_eq!(entries[0].1, vec![1]);
        assert_eq!(entries[1].1, vec![0]);
        assert!(entries[1].0 > entries[0].0 * 100.0);
    }

    #[test]
    fn test_collapse_merges_identical_vectors() {
        let (paths, index) = make_test_paths(2);
        let make = || {
            ReadPathProbabilities::from_alignment_paths(
                &[make_align_path(vec![100], 20, 1e-4)],
                &index,
                &paths,
                &frag_dist(),
                true,
                1.0,
                PRECISION,
            )
        };

        let collapsed = collapse_probabilities(vec![
            make(),
            make(),
            ReadPathProbabilities::noise(1, PRECISION),
            make(),
        ]);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].read_count(), 3);
        assert_eq!(collapsed[1].read_count(), 1);
    }
}
