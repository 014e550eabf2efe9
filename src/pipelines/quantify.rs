//! # Quantification Pipeline
//!
//! Orchestrates the per-cluster workflow:
//! 1. Match each read (or pair) to candidate reference paths
//! 2. Convert candidates to collapsed read-path probabilities
//! 3. Infer abundances / posteriors with the configured estimator
//! 4. Serialize estimates and, optionally, the probability matrix
//!
//! Clusters are independent and processed on parallel threads; every
//! cluster derives its own RNG from the run seed so results do not
//! depend on scheduling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::info_span;

use crate::config::Config;
use crate::data::{ClusterEstimates, PathInfo};
use crate::error::Result;
use crate::index::PathIndex;
use crate::io::cluster_stream::{Cluster, ClusterRead};
use crate::io::{EstimatesWriter, ProbMatrixWriter};
use crate::math::FragmentLengthDist;
use crate::model::probabilities::{collapse_probabilities, ReadPathProbabilities};
use crate::model::{AlignmentPathFinder, PathClusterEstimator};

/// One cluster's processed output, kept until the ordered write pass.
struct ClusterResult {
    cluster_id: u32,
    collapsed_probs: Vec<ReadPathProbabilities>,
    estimates: ClusterEstimates,
}

/// The quantification workflow for one run.
pub struct QuantificationPipeline<'a> {
    config: &'a Config,
    index: &'a PathIndex,
    frag_dist: FragmentLengthDist,
}

impl<'a> QuantificationPipeline<'a> {
    pub fn new(config: &'a Config, index: &'a PathIndex) -> Result<Self> {
        Ok(Self {
            config,
            index,
            frag_dist: FragmentLengthDist::new(config.frag_mean, config.frag_sd)?,
        })
    }

    /// Process every cluster and serialize the results. Cluster order
    /// in the output matches the input stream regardless of thread
    /// scheduling.
    pub fn run(
        &self,
        clusters: &[Cluster],
        estimates_writer: &EstimatesWriter,
        prob_writer: Option<&ProbMatrixWriter>,
    ) -> Result<()> {
        let estimator = PathClusterEstimator::from_config(self.config);
        let progress = AtomicUsize::new(0);
        let total = clusters.len();

        let results: Vec<ClusterResult> = clusters
            .par_iter()
            .map(|cluster| {
                let result = self.process_cluster(cluster, &estimator);

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % 1000 == 0 {
                    log::info!("Processed {}/{} clusters", done, total);
                }

                result
            })
            .collect();

        for result in &results {
            if let Some(writer) = prob_writer {
                if !result.estimates.paths.is_empty() {
                    writer.write_cluster(&result.collapsed_probs, &result.estimates.paths)?;
                }
            }
            estimates_writer.add_cluster(result.cluster_id, &result.estimates);
        }

        Ok(())
    }

    /// Run matching, probability calculation and estimation for one
    /// cluster. A cluster that fails validation is reported with zero
    /// abundances rather than aborting its neighbours.
    fn process_cluster(
        &self,
        cluster: &Cluster,
        estimator: &PathClusterEstimator,
    ) -> ClusterResult {
        let _span = info_span!("cluster", id = cluster.cluster_id).entered();

        let mut rng = StdRng::seed_from_u64(self.config.seed ^ u64::from(cluster.cluster_id));
        let paths = self.resolve_effective_lengths(&cluster.paths);

        if let Err(err) = cluster.validate() {
            log::warn!("Skipping cluster {}: {}", cluster.cluster_id, err);
            return ClusterResult {
                cluster_id: cluster.cluster_id,
                collapsed_probs: Vec::new(),
                estimates: ClusterEstimates::new(paths),
            };
        }

        let cluster_path_index: HashMap<u32, usize> = cluster
            .path_ids
            .iter()
            .enumerate()
            .map(|(col, &path_id)| (path_id, col))
            .collect();

        let finder = AlignmentPathFinder::new(self.index, self.config);
        let mut read_probs = Vec::with_capacity(cluster.reads.len());

        for read in &cluster.reads {
            let (align_paths, is_single_end) = match read {
                ClusterRead::Single(alignment) => (finder.find_alignment_paths(alignment), true),
                ClusterRead::Paired(alignment_1, alignment_2) => (
                    finder.find_paired_alignment_paths(alignment_1, alignment_2),
                    false,
                ),
            };

            read_probs.push(ReadPathProbabilities::from_alignment_paths(
                &align_paths,
                &cluster_path_index,
                &paths,
                &self.frag_dist,
                is_single_end,
                self.config.score_log_base,
                self.config.prob_precision,
            ));
        }

        let collapsed_probs = collapse_probabilities(read_probs);

        let mut estimates = ClusterEstimates::new(paths);
        estimator.estimate(&mut estimates, &collapsed_probs, &mut rng);

        ClusterResult {
            cluster_id: cluster.cluster_id,
            collapsed_probs,
            estimates,
        }
    }

    /// Fill in effective lengths the input left unset.
    fn resolve_effective_lengths(&self, paths: &[PathInfo]) -> Vec<PathInfo> {
        paths
            .iter()
            .map(|path| {
                let mut path = path.clone();
                if path.effective_length <= 0.0 {
                    path.effective_length = self.frag_dist.effective_length(path.length);
                }
                path
            })
            .collect()
    }
}
