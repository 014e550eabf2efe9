//! # Numerics Module
//!
//! ## Role
//! Scalar special functions and probability helpers shared by the
//! probability model and the estimators.
//!
//! ## Sub-modules
//! - `owens_t`: Owen's T function (Patefield-Tandy) at 53-bit precision
//! - `frag_len`: fragment length distribution and tail corrections

pub mod frag_len;
pub mod owens_t;

pub use frag_len::FragmentLengthDist;
pub use owens_t::owens_t;

/// Convert a phred-scaled quality to an error probability.
#[inline]
pub fn phred_to_prob(phred: u32) -> f64 {
    10f64.powf(-(phred as f64) / 10.0)
}

/// Standard normal cumulative distribution function.
#[inline]
pub fn std_normal_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Numerically stable log(sum(exp(values))).
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if max.is_infinite() {
        return max;
    }

    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Bivariate standard normal CDF P(X <= h, Y <= k) with correlation `rho`,
/// evaluated through Owen's T (Owen 1956, equation 2.1).
pub fn bivariate_normal_cdf(h: f64, k: f64, rho: f64) -> f64 {
    assert!(rho.abs() <= 1.0);

    if rho.abs() == 1.0 {
        // Degenerate: X and Y are (anti-)identical.
        return if rho > 0.0 {
            std_normal_cdf(h.min(k))
        } else {
            (std_normal_cdf(h) + std_normal_cdf(k) - 1.0).max(0.0)
        };
    }

    // The double-zero corner has a closed form the T-slope limits
    // cannot reach.
    if h == 0.0 && k == 0.0 {
        return 0.25 + rho.asin() / (2.0 * std::f64::consts::PI);
    }

    let denom = (1.0 - rho * rho).sqrt();

    // T-function slopes; the h = 0 / k = 0 limits follow Owen's conventions.
    let a_h = if h == 0.0 {
        if k >= 0.0 { f64::INFINITY } else { f64::NEG_INFINITY }
    } else {
        (k - rho * h) / (h * denom)
    };
    let a_k = if k == 0.0 {
        if h >= 0.0 { f64::INFINITY } else { f64::NEG_INFINITY }
    } else {
        (h - rho * k) / (k * denom)
    };

    let t_h = owens_t_inf(h, a_h);
    let t_k = owens_t_inf(k, a_k);

    // delta is 0 when hk > 0 or hk = 0 with h + k >= 0, else 1/2.
    let delta = if h * k > 0.0 || (h * k == 0.0 && h + k >= 0.0) {
        0.0
    } else {
        0.5
    };

    let val = 0.5 * (std_normal_cdf(h) + std_normal_cdf(k)) - t_h - t_k - delta;
    val.clamp(0.0, 1.0)
}

// Owen's T with the a = +-inf limit T(h, inf) = Phi(-|h|)/2.
fn owens_t_inf(h: f64, a: f64) -> f64 {
    if a.is_infinite() {
        let tail = 0.5 * std_normal_cdf(-h.abs());
        if a > 0.0 { tail } else { -tail }
    } else {
        owens_t(h, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phred_to_prob() {
        assert!((phred_to_prob(10) - 0.1).abs() < 1e-12);
        assert!((phred_to_prob(60) - 1e-6).abs() < 1e-18);
        assert!((phred_to_prob(0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp() {
        let values = vec![0f64.ln(), 1f64.ln(), 2f64.ln()];
        assert!((log_sum_exp(&values).exp() - 3.0).abs() < 1e-12);

        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_std_normal_cdf() {
        assert!((std_normal_cdf(0.0) - 0.5).abs() < 1e-15);
        assert!((std_normal_cdf(1.959963984540054) - 0.975).abs() < 1e-12);
        assert!((std_normal_cdf(-8.0)).abs() < 1e-15);
    }

    #[test]
    fn test_bivariate_normal_independent() {
        // rho = 0 factorizes.
        for &(h, k) in &[(0.0, 0.0), (1.0, -0.5), (2.3, 1.7), (-1.2, -0.4)] {
            let expected = std_normal_cdf(h) * std_normal_cdf(k);
            assert!((bivariate_normal_cdf(h, k, 0.0) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bivariate_normal_diagonal() {
        // Phi2(0, 0, rho) = 1/4 + asin(rho) / (2 pi).
        for &rho in &[-0.9f64, -0.5, 0.0, 0.3, 0.8] {
            let expected = 0.25 + rho.asin() / (2.0 * std::f64::consts::PI);
            assert!((bivariate_normal_cdf(0.0, 0.0, rho) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bivariate_normal_limits() {
        assert!((bivariate_normal_cdf(8.0, 8.0, 0.5) - 1.0).abs() < 1e-12);
        assert!(bivariate_normal_cdf(-8.0, 2.0, 0.5) < 1e-12);
        // Marginalization: Phi2(h, inf-ish, rho) -> Phi(h).
        assert!((bivariate_normal_cdf(0.7, 8.0, 0.4) - std_normal_cdf(0.7)).abs() < 1e-10);
    }
}
