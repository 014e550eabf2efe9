//! # Path Group Posteriors
//!
//! Posterior probabilities over unordered multisets of paths of a
//! fixed group size (ploidy), under the mixture whose per-read
//! probability is the group mean plus the read's noise. Exact
//! enumeration for small groups, Gibbs sampling for larger ones.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;

use crate::model::matrix::ProbabilityMatrix;

const MIN_ROW_PROB: f64 = 1e-300;

/// Gibbs chain schedule for group posterior estimation.
const GIBBS_BURN_IN: u32 = 100;
const GIBBS_SAMPLES: u32 = 1000;

/// Posterior mass over path group sets. Group sets are sorted
/// multisets of column indices.
#[derive(Debug, Clone, Default)]
pub struct GroupPosteriors {
    pub group_sets: Vec<Vec<u32>>,
    pub posteriors: Vec<f64>,
}

/// Log-likelihood of the reads under one group: each read's
/// probability is the mean over group members plus its noise.
fn group_log_likelihood(matrix: &ProbabilityMatrix, group: &[u32]) -> f64 {
    let k = group.len() as f64;
    let mut log_likelihood = 0.0;

    for row in 0..matrix.num_rows() {
        let values = matrix.row(row);
        let mean: f64 = group.iter().map(|&col| values[col as usize]).sum::<f64>() / k;
        let prob = (mean + matrix.noise(row)).max(MIN_ROW_PROB);

        log_likelihood += matrix.read_counts()[row] * prob.ln();
    }

    log_likelihood
}

/// Log prior weight of a multiset: source-count mass of each member
/// times the number of ordered arrangements.
fn group_log_weight(group: &[u32], path_counts: &[u32]) -> f64 {
    let mut weight: f64 = group
        .iter()
        .map(|&col| f64::from(path_counts[col as usize].max(1)).ln())
        .sum();

    // Multinomial coefficient over member multiplicities.
    let k = group.len();
    let mut remaining = k;
    let mut idx = 0;
    let mut arrangements = factorial(k);
    while idx < k {
        let mut run = 1;
        while idx + run < k && group[idx + run] == group[idx] {
            run += 1;
        }
        arrangements /= factorial(run);
        idx += run;
        remaining -= run;
    }
    debug_assert_eq!(remaining, 0);

    weight += (arrangements as f64).ln();
    weight
}

fn factorial(n: usize) -> u64 {
    (1..=n as u64).product::<u64>().max(1)
}

fn enumerate_multisets(num_cols: usize, group_size: u32) -> Vec<Vec<u32>> {
    let mut group_sets = Vec::new();
    let mut current = Vec::with_capacity(group_size as usize);
    enumerate_rec(num_cols as u32, group_size, 0, &mut current, &mut group_sets);
    group_sets
}

fn enumerate_rec(
    num_cols: u32,
    remaining: u32,
    min_col: u32,
    current: &mut Vec<u32>,
    out: &mut Vec<Vec<u32>>,
) {
    if remaining == 0 {
        out.push(current.clone());
        return;
    }

    for col in min_col..num_cols {
        current.push(col);
        enumerate_rec(num_cols, remaining - 1, col, current, out);
        current.pop();
    }
}

fn normalize_log_posteriors(group_sets: Vec<Vec<u32>>, log_posteriors: Vec<f64>) -> GroupPosteriors {
    let norm = crate::math::log_sum_exp(&log_posteriors);

    let posteriors = log_posteriors
        .into_iter()
        .map(|lp| {
            if norm.is_finite() {
                (lp - norm).exp()
            } else {
                0.0
            }
        })
        .collect();

    GroupPosteriors {
        group_sets,
        posteriors,
    }
}

/// Exact posterior over all multisets of size `group_size`.
pub fn calculate_group_posteriors_full(
    matrix: &ProbabilityMatrix,
    path_counts: &[u32],
    group_size: u32,
) -> GroupPosteriors {
    debug_assert_eq!(matrix.num_cols(), path_counts.len());

    let group_sets = enumerate_multisets(matrix.num_cols(), group_size);
    let log_posteriors = group_sets
        .iter()
        .map(|group| group_log_likelihood(matrix, group) + group_log_weight(group, path_counts))
        .collect();

    normalize_log_posteriors(group_sets, log_posteriors)
}

/// Exact pair posterior (group size two), retaining only groups whose
/// posterior reaches `min_hap_prob`. The retained mass is not
/// renormalized, so the result sums to at most one.
pub fn calculate_group_posteriors_bounded(
    matrix: &ProbabilityMatrix,
    path_counts: &[u32],
    min_hap_prob: f64,
) -> GroupPosteriors {
    let mut result = calculate_group_posteriors_full(matrix, path_counts, 2);

    let mut kept_sets = Vec::new();
    let mut kept_posteriors = Vec::new();

    for (group, posterior) in result.group_sets.drain(..).zip(result.posteriors.drain(..)) {
        if posterior >= min_hap_prob {
            kept_sets.push(group);
            kept_posteriors.push(posterior);
        }
    }

    GroupPosteriors {
        group_sets: kept_sets,
        posteriors: kept_posteriors,
    }
}

/// Gibbs estimate of the group posterior: systematic-scan slot
/// resampling with source-count-weighted conditionals, posterior
/// proportional to the empirical multiset frequency.
pub fn estimate_group_posteriors_gibbs(
    matrix: &ProbabilityMatrix,
    path_counts: &[u32],
    group_size: u32,
    rng: &mut StdRng,
) -> GroupPosteriors {
    debug_assert_eq!(matrix.num_cols(), path_counts.len());

    let num_cols = matrix.num_cols();
    if num_cols == 0 {
        return GroupPosteriors::default();
    }

    let mut group: Vec<u32> = (0..group_size)
        .map(|_| rng.gen_range(0..num_cols) as u32)
        .collect();

    let mut counts: std::collections::HashMap<Vec<u32>, u64> = std::collections::HashMap::new();

    for it in 0..(GIBBS_BURN_IN + GIBBS_SAMPLES) {
        for slot in 0..group_size as usize {
            let mut log_conditionals = Vec::with_capacity(num_cols);

            for col in 0..num_cols as u32 {
                group[slot] = col;
                log_conditionals.push(
                    group_log_likelihood(matrix, &group)
                        + f64::from(path_counts[col as usize].max(1)).ln(),
                );
            }

            let max = log_conditionals
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = log_conditionals.iter().map(|&lw| (lw - max).exp()).collect();

            let sampler = WeightedIndex::new(&weights)
                .expect("conditional weights are positive by construction");
            group[slot] = sampler.sample(rng) as u32;
        }

        if it >= GIBBS_BURN_IN {
            let mut sorted = group.clone();
            sorted.sort_unstable();
            *counts.entry(sorted).or_insert(0) += 1;
        }
    }

    let total: u64 = counts.values().sum();
    let mut entries: Vec<(Vec<u32>, u64)> = counts.into_iter().collect();
    entries.sort();

    GroupPosteriors {
        group_sets: entries.iter().map(|(group, _)| group.clone()).collect(),
        posteriors: entries
            .iter()
            .map(|&(_, count)| count as f64 / total as f64)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const PRECISION: f64 = 1e-8;

    /// Matrix fixture bypassing the alignment layer: each row is
    /// (path probabilities, noise, read count), already normalized.
    fn make_test_matrix(rows: &[(&[f64], f64, f64)]) -> ProbabilityMatrix {
        let num_cols = rows[0].0.len();
        let mut matrix = ProbabilityMatrix::full(&[], num_cols, PRECISION);

        for &(values, noise, count) in rows {
            matrix.push_row_for_tests(values, noise, count);
        }

        matrix
    }

    #[test]
    fn test_diplotype_enumeration_count_and_sum() {
        // Three paths, group size two: 6 multisets, posteriors sum to
        // one.
        let matrix = make_test_matrix(&[
            (&[0.5, 0.3, 0.2], 0.0, 1.0),
            (&[0.2, 0.5, 0.3], 0.0, 1.0),
        ]);

        let result = calculate_group_posteriors_full(&matrix, &[1, 1, 1], 2);

        assert_eq!(result.group_sets.len(), 6);
        let total: f64 = result.posteriors.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "total {}", total);
        assert!(result.posteriors.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_posterior_favors_supported_pair() {
        // Reads split between paths 0 and 1; path 2 unsupported.
        let matrix = make_test_matrix(&[
            (&[1.0, 0.0, 0.0], 0.0, 5.0),
            (&[0.0, 1.0, 0.0], 0.0, 5.0),
        ]);

        let result = calculate_group_posteriors_full(&matrix, &[1, 1, 1], 2);

        let best_idx = result
            .posteriors
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(result.group_sets[best_idx], vec![0, 1]);
    }

    #[test]
    fn test_source_counts_weight_the_prior() {
        // Flat likelihood: the prior decides.
        let matrix = make_test_matrix(&[(&[0.5, 0.5], 0.0, 1.0)]);

        let result = calculate_group_posteriors_full(&matrix, &[9, 1], 2);

        let homozygous_first = result
            .group_sets
            .iter()
            .position(|g| g == &vec![0, 0])
            .unwrap();
        let homozygous_second = result
            .group_sets
            .iter()
            .position(|g| g == &vec![1, 1])
            .unwrap();
        assert!(
            result.posteriors[homozygous_first] > 10.0 * result.posteriors[homozygous_second]
        );
    }

    #[test]
    fn test_bounded_retains_high_posterior_pairs() {
        let matrix = make_test_matrix(&[
            (&[1.0, 0.0, 0.0], 0.0, 10.0),
            (&[0.0, 1.0, 0.0], 0.0, 10.0),
        ]);

        let result = calculate_group_posteriors_bounded(&matrix, &[1, 1, 1], 0.05);

        assert!(!result.group_sets.is_empty());
        assert!(result.posteriors.iter().all(|&p| p >= 0.05));
        let total: f64 = result.posteriors.iter().sum();
        assert!(total <= 1.0 + 1e-9);
    }

    #[test]
    fn test_gibbs_approximates_exact() {
        let matrix = make_test_matrix(&[
            (&[0.9, 0.1, 0.0], 0.0, 8.0),
            (&[0.1, 0.9, 0.0], 0.0, 8.0),
        ]);

        let exact = calculate_group_posteriors_full(&matrix, &[1, 1, 1], 2);
        let mut rng = StdRng::seed_from_u64(42);
        let sampled = estimate_group_posteriors_gibbs(&matrix, &[1, 1, 1], 2, &mut rng);

        for (group, &posterior) in sampled.group_sets.iter().zip(&sampled.posteriors) {
            let exact_idx = exact.group_sets.iter().position(|g| g == group).unwrap();
            assert!(
                (posterior - exact.posteriors[exact_idx]).abs() < 0.1,
                "group {:?}: sampled {} exact {}",
                group,
                posterior,
                exact.posteriors[exact_idx]
            );
        }
    }

    #[test]
    fn test_gibbs_is_deterministic_under_seed() {
        let matrix = make_test_matrix(&[(&[0.6, 0.4], 0.0, 4.0)]);

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);

        let a = estimate_group_posteriors_gibbs(&matrix, &[1, 1], 2, &mut rng_a);
        let b = estimate_group_posteriors_gibbs(&matrix, &[1, 1], 2, &mut rng_b);

        assert_eq!(a.group_sets, b.group_sets);
        assert_eq!(a.posteriors, b.posteriors);
    }

    // Noise-aware check: a read explained by noise dampens likelihood
    // differences.
    #[test]
    fn test_noise_flattens_posteriors() {
        let sharp = make_test_matrix(&[(&[0.9, 0.1], 0.0, 10.0)]);
        let noisy = make_test_matrix(&[(&[0.45, 0.05], 0.5, 10.0)]);

        let sharp_post = calculate_group_posteriors_full(&sharp, &[1, 1], 2);
        let noisy_post = calculate_group_posteriors_full(&noisy, &[1, 1], 2);

        let idx = |r: &GroupPosteriors, g: &[u32]| {
            r.group_sets.iter().position(|s| s.as_slice() == g).unwrap()
        };

        let sharp_homo = sharp_post.posteriors[idx(&sharp_post, &[0, 0])];
        let noisy_homo = noisy_post.posteriors[idx(&noisy_post, &[0, 0])];
        assert!(sharp_homo > noisy_homo);
    }
}
