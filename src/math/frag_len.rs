//! # Fragment Length Model
//!
//! Zero-truncated normal model for paired-end fragment lengths, with a
//! bivariate-normal tail correction for the joint event that a fragment
//! produced the observed span and fits inside the path it is being
//! scored against.

use crate::error::{QuantError, Result};
use crate::math::{bivariate_normal_cdf, std_normal_cdf};

/// Fragment length distribution, N(mean, sd^2) truncated at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentLengthDist {
    mean: f64,
    sd: f64,
}

impl FragmentLengthDist {
    pub fn new(mean: f64, sd: f64) -> Result<Self> {
        if !(mean > 0.0 && sd > 0.0) {
            return Err(QuantError::config(format!(
                "fragment length distribution requires positive mean and sd (got {mean}, {sd})"
            )));
        }

        Ok(Self { mean, sd })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }

    /// Largest fragment length with non-negligible probability.
    pub fn max_length(&self) -> u32 {
        (self.mean + 5.0 * self.sd).ceil() as u32
    }

    /// Log-probability of a fragment length under the zero-truncated
    /// normal.
    pub fn log_prob(&self, length: u32) -> f64 {
        let z = (length as f64 - self.mean) / self.sd;
        let log_norm = (1.0 - std_normal_cdf(-self.mean / self.sd)).ln();

        -0.5 * z * z - self.sd.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln() - log_norm
    }

    /// Expected number of fragment start positions on a path of length
    /// `path_length`, averaging over fragment lengths that fit.
    pub fn effective_length(&self, path_length: u32) -> f64 {
        let upper = path_length.min(self.max_length());
        let mut total_prob = 0.0;
        let mut expected = 0.0;

        for length in 1..=upper {
            let prob = self.log_prob(length).exp();
            total_prob += prob;
            expected += prob * (path_length - length + 1) as f64;
        }

        if total_prob > 0.0 {
            expected / total_prob
        } else {
            path_length as f64
        }
    }

    /// Log-probability of observing span `length`, conditioned on the
    /// fragment fitting within a path of length `path_length`.
    ///
    /// The observed span is the true fragment length seen through up to
    /// `slack` unaligned bases (soft-clips and internal offsets), so the
    /// span and the fit bound are two correlated Gaussian views of the
    /// same latent length. The observation band and the fit condition
    /// together form a bivariate normal tail, evaluated through Owen's
    /// T:
    ///
    /// P(span in [l - 1/2, l + 1/2], X <= L) / P(X <= L)
    ///   = [Phi2(h, k+, rho) - Phi2(h, k-, rho)] / Phi(h)
    ///
    /// with h the standardized fit bound, k the standardized band edges
    /// and rho = sd / sqrt(sd^2 + tau^2) for measurement noise tau.
    pub fn log_prob_fitted(&self, length: u32, path_length: u32, slack: u32) -> f64 {
        if path_length == 0 {
            // Unknown path length: no fit constraint to apply.
            return self.log_prob(length);
        }

        let tau = slack as f64 + 1.0;
        let measure_sd = (self.sd * self.sd + tau * tau).sqrt();
        let rho = self.sd / measure_sd;

        let h = (path_length as f64 - self.mean) / self.sd;
        let k_hi = (length as f64 + 0.5 - self.mean) / measure_sd;
        let k_lo = (length as f64 - 0.5 - self.mean) / measure_sd;

        let fit = std_normal_cdf(h).max(f64::MIN_POSITIVE);
        let band = bivariate_normal_cdf(h, k_hi, rho) - bivariate_normal_cdf(h, k_lo, rho);

        (band.max(f64::MIN_POSITIVE) / fit).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(FragmentLengthDist::new(0.0, 50.0).is_err());
        assert!(FragmentLengthDist::new(300.0, 0.0).is_err());
        assert!(FragmentLengthDist::new(300.0, 50.0).is_ok());
    }

    #[test]
    fn test_log_prob_peaks_at_mean() {
        let dist = FragmentLengthDist::new(300.0, 50.0).unwrap();

        let at_mean = dist.log_prob(300);
        assert!(at_mean > dist.log_prob(200));
        assert!(at_mean > dist.log_prob(400));
        assert!((dist.log_prob(250) - dist.log_prob(350)).abs() < 1e-9);
    }

    #[test]
    fn test_log_prob_normalizes() {
        let dist = FragmentLengthDist::new(300.0, 30.0).unwrap();

        let total: f64 = (1..=1000).map(|l| dist.log_prob(l).exp()).sum();
        assert!((total - 1.0).abs() < 1e-6, "total {}", total);
    }

    #[test]
    fn test_fitted_normalizes_over_spans() {
        // Conditioned on any fit bound, the observation bands partition
        // the measurement space, so the fitted probabilities sum to one.
        let dist = FragmentLengthDist::new(300.0, 30.0).unwrap();

        for &(path_length, slack) in &[(310, 0), (310, 20), (280, 5), (100_000, 10)] {
            let total: f64 = (1..=1500)
                .map(|l| dist.log_prob_fitted(l, path_length, slack).exp())
                .sum();
            assert!(
                (total - 1.0).abs() < 1e-4,
                "total {} for path {} slack {}",
                total,
                path_length,
                slack
            );
        }
    }

    #[test]
    fn test_fitted_peaks_at_mean_on_long_paths() {
        let dist = FragmentLengthDist::new(300.0, 50.0).unwrap();

        let at_mean = dist.log_prob_fitted(300, 1_000_000, 0);
        assert!(at_mean > dist.log_prob_fitted(200, 1_000_000, 0));
        assert!(at_mean > dist.log_prob_fitted(400, 1_000_000, 0));
    }

    #[test]
    fn test_fitted_penalizes_spans_beyond_path() {
        // A span longer than the fit bound is down-weighted relative to
        // the same span on a roomy path.
        let dist = FragmentLengthDist::new(300.0, 50.0).unwrap();

        let tight = dist.log_prob_fitted(340, 320, 5);
        let roomy = dist.log_prob_fitted(340, 100_000, 5);
        assert!(tight < roomy);
    }
}
