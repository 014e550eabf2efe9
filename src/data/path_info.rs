//! # Path Metadata and Cluster Estimates
//!
//! Per-path metadata handed in with each cluster, and the estimate
//! containers the inference engine fills per cluster.

use serde::{Deserialize, Serialize};

/// Metadata for one reference path (transcript haplotype) in a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathInfo {
    pub name: String,
    pub length: u32,
    /// Expected number of fragment start positions; filled from the
    /// fragment length model when not provided.
    #[serde(default)]
    pub effective_length: f64,
    /// Upstream transcript/haplotype identifiers this path belongs to.
    #[serde(default)]
    pub source_ids: Vec<u32>,
    /// Origin group (e.g. transcript) used for nested inference.
    #[serde(default)]
    pub group_id: u32,
    /// Number of haplotypes that carry this path.
    #[serde(default = "default_source_count")]
    pub source_count: u32,
}

fn default_source_count() -> u32 {
    1
}

/// Gibbs read-count samples for a set of paths. `samples` is flat,
/// sample-major: one entry per path id per recorded sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountSamples {
    pub path_ids: Vec<u32>,
    pub samples: Vec<f64>,
}

/// Per-cluster inference output: expected read counts per path, group
/// posteriors over the group sets they belong to, and optional Gibbs
/// read-count samples.
#[derive(Debug, Clone, Default)]
pub struct ClusterEstimates {
    pub paths: Vec<PathInfo>,
    /// Flat abundance vector. For grouped output this holds
    /// `path_group_sets.len() * group_size` entries, one per group
    /// member; for plain output one entry per path.
    pub abundances: Vec<f64>,
    pub posteriors: Vec<f64>,
    pub path_group_sets: Vec<Vec<u32>>,
    pub gibbs_read_count_samples: Vec<CountSamples>,
    pub total_read_count: f64,
}

impl ClusterEstimates {
    pub fn new(paths: Vec<PathInfo>) -> Self {
        Self {
            paths,
            ..Self::default()
        }
    }

    /// Reset to singleton groups over `num_paths` paths, with the given
    /// initial posterior and zero abundances.
    pub fn reset(&mut self, num_paths: usize, init_posterior: f64) {
        self.abundances = vec![0.0; num_paths];
        self.posteriors = vec![init_posterior; num_paths];
        self.path_group_sets = (0..num_paths as u32).map(|i| vec![i]).collect();
        self.gibbs_read_count_samples.clear();
    }

    /// Reset to an empty grouped state.
    pub fn reset_grouped(&mut self) {
        self.abundances.clear();
        self.posteriors.clear();
        self.path_group_sets.clear();
        self.gibbs_read_count_samples.clear();
    }

    /// Flatten group estimates to per-path (posterior, read count)
    /// pairs for serialization. Posteriors of all groups containing a
    /// path accumulate (clamped to one); abundances of repeated group
    /// members accumulate as-is.
    pub fn per_path_estimates(&self) -> Vec<(f64, f64)> {
        let mut flat = vec![(0.0, 0.0); self.paths.len()];
        let mut abundance_idx = 0usize;

        for (set_idx, group_set) in self.path_group_sets.iter().enumerate() {
            let posterior = self.posteriors.get(set_idx).copied().unwrap_or(0.0);

            let mut seen_in_set: Vec<u32> = Vec::with_capacity(group_set.len());
            for &path in group_set {
                let entry = &mut flat[path as usize];

                // A path occurring twice in one group (homozygous
                // diplotype) contributes its posterior once.
                if !seen_in_set.contains(&path) {
                    entry.0 = (entry.0 + posterior).min(1.0);
                    seen_in_set.push(path);
                }

                entry.1 += self.abundances.get(abundance_idx).copied().unwrap_or(0.0);
                abundance_idx += 1;
            }
        }

        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_paths(n: usize) -> Vec<PathInfo> {
        (0..n)
            .map(|i| PathInfo {
                name: format!("path_{}", i),
                length: 1000,
                effective_length: 900.0,
                source_ids: vec![i as u32],
                group_id: 0,
                source_count: 1,
            })
            .collect()
    }

    #[test]
    fn test_reset_builds_singleton_groups() {
        let mut estimates = ClusterEstimates::new(make_test_paths(3));
        estimates.reset(3, 1.0);

        assert_eq!(estimates.abundances, vec![0.0; 3]);
        assert_eq!(estimates.posteriors, vec![1.0; 3]);
        assert_eq!(estimates.path_group_sets, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_per_path_flattening() {
        let mut estimates = ClusterEstimates::new(make_test_paths(3));
        estimates.path_group_sets = vec![vec![0, 1], vec![0, 0]];
        estimates.posteriors = vec![0.75, 0.25];
        estimates.abundances = vec![10.0, 6.0, 2.0, 2.0];

        let flat = estimates.per_path_estimates();

        assert!((flat[0].0 - 1.0).abs() < 1e-12);
        assert!((flat[0].1 - 14.0).abs() < 1e-12);
        assert!((flat[1].0 - 0.75).abs() < 1e-12);
        assert!((flat[1].1 - 6.0).abs() < 1e-12);
        assert_eq!(flat[2], (0.0, 0.0));
    }
}
