//! # Probability Matrix Assembly
//!
//! Dense row-major read x path probability matrix with a parallel
//! noise column and read-count vector. Cluster sizes are modest, so a
//! flat `Vec<f64>` layout is enough.

use std::collections::HashMap;

use crate::model::probabilities::ReadPathProbabilities;

/// Dense row-major probability matrix over one cluster.
#[derive(Debug, Clone, Default)]
pub struct ProbabilityMatrix {
    probs: Vec<f64>,
    noise: Vec<f64>,
    read_counts: Vec<f64>,
    num_cols: usize,
}

impl ProbabilityMatrix {
    /// One column per cluster path.
    pub fn full(
        cluster_probs: &[ReadPathProbabilities],
        num_paths: usize,
        prob_precision: f64,
    ) -> Self {
        let columns: Vec<u32> = (0..num_paths as u32).collect();
        Self::partial(cluster_probs, &columns, prob_precision, false)
    }

    /// Only the given path columns, in the given order. With
    /// `zero_noise_counts`, rows that are pure noise keep their place
    /// but contribute no reads.
    pub fn partial(
        cluster_probs: &[ReadPathProbabilities],
        columns: &[u32],
        prob_precision: f64,
        zero_noise_counts: bool,
    ) -> Self {
        let column_index: HashMap<u32, usize> = columns
            .iter()
            .enumerate()
            .map(|(idx, &col)| (col, idx))
            .collect();

        let num_cols = columns.len();
        let mut matrix = Self {
            probs: vec![0.0; cluster_probs.len() * num_cols],
            noise: Vec::with_capacity(cluster_probs.len()),
            read_counts: Vec::with_capacity(cluster_probs.len()),
            num_cols,
        };

        for (row, read_probs) in cluster_probs.iter().enumerate() {
            let noise = read_probs.noise_prob(prob_precision);
            matrix.noise.push(noise);

            let mut count = f64::from(read_probs.read_count());
            if zero_noise_counts && (noise - 1.0).abs() < prob_precision {
                count = 0.0;
            }
            matrix.read_counts.push(count);

            for (prob, cols) in read_probs.collapsed_probs(prob_precision) {
                for col in cols {
                    if let Some(&idx) = column_index.get(col) {
                        matrix.probs[row * num_cols + idx] = prob;
                    }
                }
            }
        }

        matrix
    }

    /// One column per path group; a group's probability is the maximum
    /// over its members, coherent with a diplotype mixture.
    pub fn grouped(
        cluster_probs: &[ReadPathProbabilities],
        groups: &[Vec<u32>],
        prob_precision: f64,
    ) -> Self {
        let mut member_group: HashMap<u32, Vec<usize>> = HashMap::new();
        for (group_idx, group) in groups.iter().enumerate() {
            for &member in group {
                member_group.entry(member).or_default().push(group_idx);
            }
        }

        let num_cols = groups.len();
        let mut matrix = Self {
            probs: vec![0.0; cluster_probs.len() * num_cols],
            noise: Vec::with_capacity(cluster_probs.len()),
            read_counts: Vec::with_capacity(cluster_probs.len()),
            num_cols,
        };

        for (row, read_probs) in cluster_probs.iter().enumerate() {
            matrix.noise.push(read_probs.noise_prob(prob_precision));
            matrix
                .read_counts
                .push(f64::from(read_probs.read_count()));

            for (prob, cols) in read_probs.collapsed_probs(prob_precision) {
                for col in cols {
                    for &group_idx in member_group.get(col).map_or(&[][..], Vec::as_slice) {
                        let entry = &mut matrix.probs[row * num_cols + group_idx];
                        *entry = entry.max(prob);
                    }
                }
            }
        }

        matrix
    }

    pub fn num_rows(&self) -> usize {
        self.read_counts.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn is_empty(&self) -> bool {
        self.read_counts.is_empty()
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.probs[row * self.num_cols..(row + 1) * self.num_cols]
    }

    pub fn noise(&self, row: usize) -> f64 {
        self.noise[row]
    }

    pub fn read_counts(&self) -> &[f64] {
        &self.read_counts
    }

    pub fn total_read_count(&self) -> f64 {
        self.read_counts.iter().sum()
    }

    /// Subtract each row's noise from its entries, drop rows left with
    /// no probability mass, and row-normalize the rest.
    pub fn subtract_noise_and_normalize(&mut self) {
        let mut kept_probs = Vec::with_capacity(self.probs.len());
        let mut kept_noise = Vec::with_capacity(self.noise.len());
        let mut kept_counts = Vec::with_capacity(self.read_counts.len());

        for row in 0..self.num_rows() {
            let noise = self.noise[row];
            let values: Vec<f64> = self
                .row(row)
                .iter()
                .map(|&p| (p - noise).max(0.0))
                .collect();

            let row_sum: f64 = values.iter().sum();
            if row_sum <= 0.0 {
                continue;
            }

            kept_probs.extend(values.into_iter().map(|p| p / row_sum));
            kept_noise.push(noise);
            kept_counts.push(self.read_counts[row]);
        }

        self.probs = kept_probs;
        self.noise = kept_noise;
        self.read_counts = kept_counts;
    }

    /// Expose the noise as an additional last column and row-normalize
    /// over paths plus noise.
    pub fn add_noise_and_normalize(&mut self) {
        let old_cols = self.num_cols;
        let new_cols = old_cols + 1;
        let mut probs = Vec::with_capacity(self.num_rows() * new_cols);

        for row in 0..self.num_rows() {
            let noise = self.noise[row];
            let row_sum: f64 = self.row(row).iter().sum::<f64>() + noise;

            if row_sum > 0.0 {
                probs.extend(self.row(row).iter().map(|&p| p / row_sum));
                probs.push(noise / row_sum);
            } else {
                probs.extend(std::iter::repeat(0.0).take(old_cols));
                probs.push(1.0);
            }
        }

        self.probs = probs;
        self.num_cols = new_cols;
    }

    /// Detach the last column back into the noise vector. Inverse of
    /// `add_noise_and_normalize` after read collapsing.
    pub fn split_off_noise_column(&mut self) {
        debug_assert!(self.num_cols > 0);

        let old_cols = self.num_cols;
        let new_cols = old_cols - 1;
        let mut probs = Vec::with_capacity(self.num_rows() * new_cols);
        let mut noise = Vec::with_capacity(self.num_rows());

        for row in 0..self.num_rows() {
            let values = self.row(row);
            probs.extend_from_slice(&values[..new_cols]);
            noise.push(values[new_cols]);
        }

        self.probs = probs;
        self.noise = noise;
        self.num_cols = new_cols;
    }

    /// Append a hand-built row; test fixtures only.
    #[cfg(test)]
    pub(crate) fn push_row_for_tests(&mut self, values: &[f64], noise: f64, count: f64) {
        debug_assert_eq!(values.len(), self.num_cols);
        self.probs.extend_from_slice(values);
        self.noise.push(noise);
        self.read_counts.push(count);
    }

    /// Merge rows with identical numeric content (to the probability
    /// precision) by summing their read counts.
    pub fn collapse_reads(&mut self, prob_precision: f64) {
        let mut seen: HashMap<Vec<u64>, usize> = HashMap::new();
        let mut kept_probs = Vec::with_capacity(self.probs.len());
        let mut kept_noise = Vec::with_capacity(self.noise.len());
        let mut kept_counts: Vec<f64> = Vec::with_capacity(self.read_counts.len());

        for row in 0..self.num_rows() {
            let key: Vec<u64> = self
                .row(row)
                .iter()
                .map(|&p| (p / prob_precision).round() as u64)
                .collect();

            match seen.get(&key) {
                Some(&kept_row) => kept_counts[kept_row] += self.read_counts[row],
                None => {
                    seen.insert(key, kept_counts.len());
                    kept_probs.extend_from_slice(self.row(row));
                    kept_noise.push(self.noise[row]);
                    kept_counts.push(self.read_counts[row]);
                }
            }
        }

        self.probs = kept_probs;
        self.noise = kept_noise;
        self.read_counts = kept_counts;
    }
}
