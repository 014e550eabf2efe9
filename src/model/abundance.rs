//! # Abundance Estimators
//!
//! Per-cluster abundance inference over the read x path probability
//! matrix: an EM estimator with a Gibbs read-count sampler, a weighted
//! minimum-path-cover variant that restricts EM to a parsimonious path
//! subset, and a nested (diplotype-aware) estimator that samples path
//! subsets from group posteriors before running EM on each subset.

use std::collections::{BTreeMap, HashMap};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand_distr::{Binomial, Gamma};

use crate::config::{Config, InferenceModel};
use crate::data::{ClusterEstimates, CountSamples, PathInfo};
use crate::model::matrix::ProbabilityMatrix;
use crate::model::posterior::{
    calculate_group_posteriors_bounded, calculate_group_posteriors_full,
    estimate_group_posteriors_gibbs, GroupPosteriors,
};
use crate::model::probabilities::ReadPathProbabilities;

const MIN_EM_CONV_ITS: u32 = 10;
const MIN_EM_ABUNDANCE: f64 = 1e-8;
const ABUNDANCE_GIBBS_GAMMA: f64 = 1.0;

/// Estimator parameters lifted from the run configuration.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorParams {
    pub max_em_its: u32,
    pub max_rel_em_conv: f64,
    pub num_gibbs_samples: u32,
    pub gibbs_thin_its: u32,
    pub prob_precision: f64,
    pub group_size: u32,
    pub min_hap_prob: f64,
    pub infer_collapsed: bool,
    pub use_group_post_gibbs: bool,
}

impl EstimatorParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_em_its: config.max_em_its,
            max_rel_em_conv: config.max_rel_em_conv,
            num_gibbs_samples: config.num_gibbs_samples,
            gibbs_thin_its: config.gibbs_thin_its,
            prob_precision: config.prob_precision,
            group_size: config.group_size,
            min_hap_prob: config.min_hap_prob,
            infer_collapsed: config.infer_collapsed,
            use_group_post_gibbs: config.use_group_post_gibbs,
        }
    }
}

/// The configured abundance estimator for one run.
#[derive(Debug, Clone, Copy)]
pub struct PathClusterEstimator {
    model: InferenceModel,
    params: EstimatorParams,
}

impl PathClusterEstimator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.inference_model,
            params: EstimatorParams::from_config(config),
        }
    }

    /// Estimate abundances for one cluster. A cluster that cannot be
    /// estimated keeps zero abundances.
    pub fn estimate(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
    ) {
        match self.model {
            InferenceModel::Em => self.estimate_em(estimates, cluster_probs, rng),
            InferenceModel::MinCover => self.estimate_min_cover(estimates, cluster_probs, rng),
            InferenceModel::Nested => {
                if self.params.infer_collapsed {
                    self.estimate_nested_collapsed(estimates, cluster_probs, rng)
                } else {
                    self.estimate_nested_independent(estimates, cluster_probs, rng)
                }
            }
        }
    }

    fn estimate_em(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
    ) {
        let num_paths = estimates.paths.len();
        estimates.reset(num_paths, 1.0);

        if cluster_probs.is_empty() {
            return;
        }

        let mut matrix =
            ProbabilityMatrix::full(cluster_probs, num_paths, self.params.prob_precision);
        matrix.subtract_noise_and_normalize();

        if matrix.is_empty() {
            return;
        }

        let total_read_count = matrix.total_read_count();
        debug_assert!(total_read_count > 0.0);

        estimates.abundances = em_abundance_estimator(&matrix, total_read_count, &self.params);
        estimates.total_read_count = total_read_count;

        if self.params.num_gibbs_samples > 0 {
            let samples = gibbs_read_count_sampler(
                &matrix,
                &estimates.abundances,
                total_read_count,
                ABUNDANCE_GIBBS_GAMMA,
                rng,
                self.params.num_gibbs_samples,
                self.params.gibbs_thin_its,
            );

            estimates.gibbs_read_count_samples.push(CountSamples {
                path_ids: (0..num_paths as u32).collect(),
                samples,
            });
        }
    }

    fn estimate_min_cover(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
    ) {
        let num_paths = estimates.paths.len();
        estimates.reset(num_paths, 1.0);

        if cluster_probs.is_empty() {
            return;
        }

        // Boolean cover matrix with count weights; pure-noise reads
        // keep their rows but cover nothing.
        let mut read_counts: Vec<f64> = Vec::with_capacity(cluster_probs.len());
        let mut cover = vec![false; cluster_probs.len() * num_paths];
        let mut path_weights = vec![0.0; num_paths];

        for (row, read_probs) in cluster_probs.iter().enumerate() {
            let noise = read_probs.noise_prob(self.params.prob_precision);
            let count = if (noise - 1.0).abs() < self.params.prob_precision {
                0.0
            } else {
                f64::from(read_probs.read_count())
            };
            read_counts.push(count);

            for (prob, cols) in read_probs.collapsed_probs(self.params.prob_precision) {
                debug_assert!(prob > 0.0);

                for &col in cols {
                    cover[row * num_paths + col as usize] = true;
                    path_weights[col as usize] += prob.ln() * count;
                }
            }
        }

        for weight in &mut path_weights {
            *weight *= -1.0;
        }

        let min_path_cover =
            weighted_minimum_path_cover(&cover, num_paths, &read_counts, &path_weights);

        if min_path_cover.is_empty() {
            return;
        }

        let mut matrix = ProbabilityMatrix::partial(
            cluster_probs,
            &min_path_cover,
            self.params.prob_precision,
            true,
        );
        matrix.subtract_noise_and_normalize();

        if matrix.is_empty() {
            return;
        }

        matrix.collapse_reads(self.params.prob_precision);

        let total_read_count = matrix.total_read_count();
        debug_assert!(total_read_count > 0.0);

        let cover_abundances = em_abundance_estimator(&matrix, total_read_count, &self.params);
        estimates.total_read_count = total_read_count;

        for (cover_idx, &path) in min_path_cover.iter().enumerate() {
            estimates.abundances[path as usize] += cover_abundances[cover_idx];
        }

        if self.params.num_gibbs_samples > 0 {
            let samples = gibbs_read_count_sampler(
                &matrix,
                &cover_abundances,
                total_read_count,
                ABUNDANCE_GIBBS_GAMMA,
                rng,
                self.params.num_gibbs_samples,
                self.params.gibbs_thin_its,
            );

            estimates.gibbs_read_count_samples.push(CountSamples {
                path_ids: min_path_cover,
                samples,
            });
        }
    }

    /// Nested inference with one posterior per `group_id` partition:
    /// full-genome subsets are drawn by sampling every group
    /// independently.
    fn estimate_nested_independent(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
    ) {
        estimates.reset_grouped();

        if cluster_probs.is_empty() {
            return;
        }

        let path_groups = find_path_groups(&estimates.paths);
        let num_subset_samples = (1.0 / self.params.min_hap_prob).floor() as usize;
        let mut subset_samples: Vec<Vec<u32>> = vec![Vec::new(); num_subset_samples];

        for group in &path_groups {
            let group_posteriors = self.group_posteriors(cluster_probs, estimates, group, rng);

            sample_group_path_indices(&mut subset_samples, &group_posteriors, group, rng);
        }

        let mut clustered: BTreeMap<Vec<u32>, f64> = BTreeMap::new();
        let weight = 1.0 / num_subset_samples as f64;

        for mut subset in subset_samples {
            subset.sort_unstable();
            *clustered.entry(subset).or_insert(0.0) += weight;
        }

        clustered.retain(|subset, _| !subset.is_empty());
        self.infer_path_subset_abundance(estimates, cluster_probs, rng, &clustered);
    }

    /// Nested inference over collapsed groups: maximal path sets with
    /// an identical source-id set share one posterior column.
    fn estimate_nested_collapsed(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
    ) {
        estimates.reset_grouped();

        if cluster_probs.is_empty() {
            return;
        }

        let (source_groups, source_counts) = find_path_source_groups(&estimates.paths);

        let mut matrix =
            ProbabilityMatrix::grouped(cluster_probs, &source_groups, self.params.prob_precision);
        matrix.add_noise_and_normalize();
        matrix.collapse_reads(self.params.prob_precision);
        matrix.split_off_noise_column();

        let group_posteriors = if self.params.use_group_post_gibbs {
            estimate_group_posteriors_gibbs(&matrix, &source_counts, self.params.group_size, rng)
        } else if self.params.group_size == 2 {
            calculate_group_posteriors_bounded(&matrix, &source_counts, self.params.min_hap_prob)
        } else {
            calculate_group_posteriors_full(&matrix, &source_counts, self.params.group_size)
        };

        let mut subset_samples: BTreeMap<Vec<u32>, f64> = BTreeMap::new();

        for (group_set, &posterior) in group_posteriors
            .group_sets
            .iter()
            .zip(&group_posteriors.posteriors)
        {
            if posterior < self.params.min_hap_prob {
                continue;
            }

            let mut subset = Vec::new();
            for &group_idx in group_set {
                subset.extend_from_slice(&source_groups[group_idx as usize]);
            }
            subset.sort_unstable();

            *subset_samples.entry(subset).or_insert(0.0) += posterior;
        }

        self.infer_path_subset_abundance(estimates, cluster_probs, rng, &subset_samples);
    }

    /// Posterior over one group's members, through the configured
    /// calculator.
    fn group_posteriors(
        &self,
        cluster_probs: &[ReadPathProbabilities],
        estimates: &ClusterEstimates,
        group: &[u32],
        rng: &mut StdRng,
    ) -> GroupPosteriors {
        let mut matrix =
            ProbabilityMatrix::partial(cluster_probs, group, self.params.prob_precision, false);
        matrix.add_noise_and_normalize();
        matrix.collapse_reads(self.params.prob_precision);
        matrix.split_off_noise_column();

        let group_path_counts: Vec<u32> = group
            .iter()
            .map(|&path| estimates.paths[path as usize].source_count)
            .collect();

        if self.params.use_group_post_gibbs {
            estimate_group_posteriors_gibbs(&matrix, &group_path_counts, self.params.group_size, rng)
        } else if self.params.group_size == 2 {
            calculate_group_posteriors_bounded(&matrix, &group_path_counts, self.params.min_hap_prob)
        } else {
            calculate_group_posteriors_full(&matrix, &group_path_counts, self.params.group_size)
        }
    }

    /// Run EM (and optionally the Gibbs read-count sampler) on every
    /// sampled path subset, then aggregate member abundances by
    /// `group_id` weighted by subset probability.
    fn infer_path_subset_abundance(
        &self,
        estimates: &mut ClusterEstimates,
        cluster_probs: &[ReadPathProbabilities],
        rng: &mut StdRng,
        subset_samples: &BTreeMap<Vec<u32>, f64>,
    ) {
        // Group member set -> (posterior weight, per-member abundance).
        let mut group_estimates: BTreeMap<Vec<u32>, (f64, Vec<f64>)> = BTreeMap::new();

        let mut gibbs_samples_left = self.params.num_gibbs_samples;
        let mut gibbs_prob_left = 1.0;
        let mut total_read_count_seen: f64 = 0.0;

        for (subset, &subset_weight) in subset_samples {
            debug_assert!(!subset.is_empty());
            debug_assert!(subset_weight > 0.0);

            // Duplicate ids (homozygous groups) share one EM column.
            let mut collapsed_subset: Vec<u32> = Vec::with_capacity(subset.len());
            let mut multiplicity: HashMap<u32, u32> = HashMap::new();

            for &path in subset {
                if collapsed_subset.last() != Some(&path) {
                    collapsed_subset.push(path);
                }
                *multiplicity.entry(path).or_insert(0) += 1;
            }

            let mut matrix = ProbabilityMatrix::partial(
                cluster_probs,
                &collapsed_subset,
                self.params.prob_precision,
                true,
            );
            matrix.subtract_noise_and_normalize();

            // The Gibbs sample budget for this subset is drawn before
            // the emptiness check so the split covers all subsets.
            let mut cur_gibbs_samples = 0u32;
            if gibbs_samples_left > 0 {
                debug_assert!(gibbs_prob_left > 0.0);

                let sampler = Binomial::new(
                    u64::from(gibbs_samples_left),
                    (subset_weight / gibbs_prob_left).min(1.0),
                )
                .expect("binomial probability in range");
                cur_gibbs_samples = sampler.sample(rng) as u32;

                gibbs_samples_left -= cur_gibbs_samples;
                gibbs_prob_left -= subset_weight;
            }

            if matrix.is_empty() {
                continue;
            }

            matrix.collapse_reads(self.params.prob_precision);

            let total_read_count = matrix.total_read_count();
            debug_assert!(total_read_count > 0.0);
            total_read_count_seen = total_read_count_seen.max(total_read_count);

            let subset_abundances =
                em_abundance_estimator(&matrix, total_read_count, &self.params);
            debug_assert_eq!(subset_abundances.len(), collapsed_subset.len());

            if cur_gibbs_samples > 0 {
                let samples = gibbs_read_count_sampler(
                    &matrix,
                    &subset_abundances,
                    total_read_count,
                    ABUNDANCE_GIBBS_GAMMA,
                    rng,
                    cur_gibbs_samples,
                    self.params.gibbs_thin_its,
                );

                estimates.gibbs_read_count_samples.push(CountSamples {
                    path_ids: collapsed_subset.clone(),
                    samples,
                });
            }

            let collapsed_index: HashMap<u32, usize> = collapsed_subset
                .iter()
                .enumerate()
                .map(|(idx, &path)| (path, idx))
                .collect();

            // Partition the subset's members by origin group.
            let mut subset_path_groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
            for &path in subset {
                subset_path_groups
                    .entry(estimates.paths[path as usize].group_id)
                    .or_default()
                    .push(path);
            }

            for members in subset_path_groups.into_values() {
                let entry = group_estimates
                    .entry(members.clone())
                    .or_insert_with(|| (0.0, vec![0.0; members.len()]));
                entry.0 += subset_weight;

                for (member_idx, &path) in members.iter().enumerate() {
                    let collapsed_idx = collapsed_index[&path];
                    let share = f64::from(multiplicity[&path]);

                    entry.1[member_idx] +=
                        subset_abundances[collapsed_idx] * subset_weight / share;
                }
            }
        }

        estimates.total_read_count = total_read_count_seen;
        estimates.path_group_sets.reserve(group_estimates.len());
        estimates.posteriors.reserve(group_estimates.len());

        for (members, (weight, abundances)) in group_estimates {
            estimates.path_group_sets.push(members);
            estimates.posteriors.push(weight.min(1.0));
            estimates.abundances.extend(abundances);
        }
    }
}

/// EM over the noise-subtracted, row-normalized probability matrix.
/// Returns abundances scaled to `total_read_count`.
fn em_abundance_estimator(
    matrix: &ProbabilityMatrix,
    total_read_count: f64,
    params: &EstimatorParams,
) -> Vec<f64> {
    let num_cols = matrix.num_cols();
    let mut abundances = vec![1.0 / num_cols as f64; num_cols];
    let mut prev_abundances = abundances.clone();
    let read_counts = matrix.read_counts();

    let mut conv_its = 0u32;

    for _ in 0..params.max_em_its {
        let mut next = vec![0.0; num_cols];

        for row in 0..matrix.num_rows() {
            let values = matrix.row(row);

            let row_sum: f64 = values
                .iter()
                .zip(&abundances)
                .map(|(&p, &x)| p * x)
                .sum();
            if row_sum <= 0.0 {
                continue;
            }

            let scale = read_counts[row] / row_sum;
            for (next_x, (&p, &x)) in next.iter_mut().zip(values.iter().zip(&abundances)) {
                *next_x += p * x * scale;
            }
        }

        for x in &mut next {
            *x /= total_read_count;
        }
        abundances = next;

        let has_converged = abundances
            .iter()
            .zip(&prev_abundances)
            .all(|(&x, &prev)| {
                x < MIN_EM_ABUNDANCE || ((x - prev).abs() / x) <= params.max_rel_em_conv
            });

        if has_converged {
            conv_its += 1;
            if conv_its == MIN_EM_CONV_ITS {
                break;
            }
        } else {
            conv_its = 0;
        }

        prev_abundances.clone_from(&abundances);
    }

    let mut abundance_sum = 0.0;
    for x in &mut abundances {
        if *x < MIN_EM_ABUNDANCE {
            *x = 0.0;
        }
        abundance_sum += *x;
    }

    if abundance_sum > 0.0 {
        for x in &mut abundances {
            *x = *x / abundance_sum * total_read_count;
        }
    }

    abundances
}

/// Gibbs sampler over read assignments: sequential conditional
/// binomials per row, Gamma-renewed abundances, one recorded sample
/// every `thin_its` iterations. Returns the flat sample vector
/// (sample-major).
#[allow(clippy::too_many_arguments)]
fn gibbs_read_count_sampler(
    matrix: &ProbabilityMatrix,
    abundances: &[f64],
    total_read_count: f64,
    gamma: f64,
    rng: &mut StdRng,
    num_samples: u32,
    thin_its: u32,
) -> Vec<f64> {
    let num_cols = matrix.num_cols();
    let read_counts = matrix.read_counts();

    let mut samples = Vec::with_capacity(num_cols * num_samples as usize);

    let mut gibbs_abundances: Vec<f64> =
        abundances.iter().map(|&x| x / total_read_count).collect();
    debug_assert!((gibbs_abundances.iter().sum::<f64>() - 1.0).abs() < 1e-6);

    let num_its = num_samples * thin_its;

    for it in 1..=num_its {
        let mut path_read_counts = vec![0u64; num_cols];

        for row in 0..matrix.num_rows() {
            let values = matrix.row(row);

            let row_sum: f64 = values
                .iter()
                .zip(&gibbs_abundances)
                .map(|(&p, &x)| p * x)
                .sum();
            if row_sum <= 0.0 {
                continue;
            }

            let mut remaining = read_counts[row].round() as u64;
            let mut remaining_prob = 1.0;

            for (col, (&p, &x)) in values.iter().zip(&gibbs_abundances).enumerate() {
                let posterior = p * x / row_sum;

                if posterior > 0.0 {
                    debug_assert!(remaining_prob > 0.0);

                    let sampler =
                        Binomial::new(remaining, (posterior / remaining_prob).min(1.0))
                            .expect("binomial probability in range");
                    let count = sampler.sample(rng);

                    path_read_counts[col] += count;
                    remaining -= count;

                    if remaining == 0 {
                        break;
                    }
                }

                remaining_prob -= posterior;
            }

            debug_assert_eq!(remaining, 0);
        }

        let mut abundance_sum = 0.0;
        for (x, &count) in gibbs_abundances.iter_mut().zip(&path_read_counts) {
            let sampler = Gamma::new(count as f64 + gamma, 1.0).expect("valid gamma shape");
            *x = sampler.sample(rng);
            abundance_sum += *x;
        }
        for x in &mut gibbs_abundances {
            *x /= abundance_sum;
        }

        if it % thin_its == 0 {
            samples.extend(gibbs_abundances.iter().map(|&x| x * total_read_count));
        }
    }

    samples
}

/// Greedy weighted set cover: pick the path covering the most
/// remaining read count per unit weight until every countable read is
/// covered. Returns columns in ascending order.
fn weighted_minimum_path_cover(
    cover: &[bool],
    num_cols: usize,
    read_counts: &[f64],
    path_weights: &[f64],
) -> Vec<u32> {
    debug_assert_eq!(cover.len(), read_counts.len() * num_cols);
    debug_assert_eq!(num_cols, path_weights.len());

    if num_cols == 1 {
        return vec![0];
    }

    let mut uncovered = read_counts.to_vec();
    let mut min_path_cover = Vec::new();

    while uncovered.iter().cloned().fold(0.0f64, f64::max) > 0.0 {
        let mut best_score = 0.0;
        let mut best_col: Option<usize> = None;

        for col in 0..num_cols {
            let covered_count: f64 = uncovered
                .iter()
                .enumerate()
                .filter(|&(row, _)| cover[row * num_cols + col])
                .map(|(_, &count)| count)
                .sum();
            let score = covered_count / path_weights[col];

            if score > best_score {
                best_score = score;
                best_col = Some(col);
            }
        }

        let Some(best_col) = best_col else {
            // Remaining reads are only on zero-weight, zero-cover
            // paths; nothing more to pick.
            break;
        };

        min_path_cover.push(best_col as u32);
        for (row, count) in uncovered.iter_mut().enumerate() {
            if cover[row * num_cols + best_col] {
                *count = 0.0;
            }
        }
    }

    debug_assert!(min_path_cover.len() <= num_cols);
    min_path_cover.sort_unstable();
    min_path_cover
}

/// Partition path indices by `group_id`, in first-seen order.
fn find_path_groups(paths: &[PathInfo]) -> Vec<Vec<u32>> {
    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut group_index: HashMap<u32, usize> = HashMap::new();

    for (idx, path) in paths.iter().enumerate() {
        let next_slot = groups.len();
        let slot = *group_index.entry(path.group_id).or_insert(next_slot);

        if slot == groups.len() {
            groups.push(Vec::new());
        }
        groups[slot].push(idx as u32);
    }

    groups
}

/// Maximal sets of paths sharing an identical source-id set, together
/// with the number of sources backing each set.
fn find_path_source_groups(paths: &[PathInfo]) -> (Vec<Vec<u32>>, Vec<u32>) {
    let mut source_paths: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

    for (idx, path) in paths.iter().enumerate() {
        for &source_id in &path.source_ids {
            source_paths.entry(source_id).or_default().push(idx as u32);
        }
    }

    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let mut claimed: HashMap<Vec<u32>, usize> = HashMap::new();

    for path_set in source_paths.into_values() {
        match claimed.get(&path_set) {
            Some(&idx) => counts[idx] += 1,
            None => {
                claimed.insert(path_set.clone(), groups.len());
                groups.push(path_set);
                counts.push(1);
            }
        }
    }

    (groups, counts)
}

/// Draw one group set per subset sample from the group's posterior and
/// append the global path indices.
fn sample_group_path_indices(
    subset_samples: &mut [Vec<u32>],
    group_posteriors: &GroupPosteriors,
    group: &[u32],
    rng: &mut StdRng,
) {
    debug_assert_eq!(
        group_posteriors.group_sets.len(),
        group_posteriors.posteriors.len()
    );

    if group_posteriors.posteriors.iter().sum::<f64>() <= 0.0 {
        return;
    }

    let sampler = WeightedIndex::new(&group_posteriors.posteriors)
        .expect("posterior weights are non-negative with positive sum");

    for subset in subset_samples.iter_mut() {
        let mut group_set = group_posteriors.group_sets[sampler.sample(rng)].clone();
        debug_assert!(!group_set.is_empty());

        group_set.sort_unstable();
        for member in group_set {
            subset.push(group[member as usize]);
        }
    }
}
