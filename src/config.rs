//! # Configuration Logic
//!
//! CLI argument parsing and validation using clap derive.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{QuantError, Result};

/// Sequencing library strandedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    /// Forward-reverse: extend alignments forward.
    Fr,
    /// Reverse-forward: extend the reverse complement.
    Rf,
    /// Unknown strandedness: try both unless the index is
    /// bidirectional.
    Unstranded,
}

/// Abundance inference model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InferenceModel {
    /// Expectation maximization over all candidate paths.
    Em,
    /// Weighted minimum path cover followed by EM on the cover.
    MinCover,
    /// Diplotype/ploidy-aware nested inference with group posteriors.
    Nested,
}

/// graphquant: transcript and haplotype quantification from variation
/// graph alignments
#[derive(Parser, Debug, Clone)]
#[command(name = "graphquant")]
#[command(version = "0.1.0")]
#[command(about = "Haplotype-resolved transcript quantification from variation graph alignments", long_about = None)]
pub struct Config {
    // ============ Data Parameters ============
    /// Haplotype path index (JSON description)
    #[arg(long, value_name = "FILE")]
    pub index: PathBuf,

    /// Cluster stream (JSON lines, one cluster per line)
    #[arg(long, value_name = "FILE")]
    pub clusters: PathBuf,

    /// Output file prefix (required)
    #[arg(long, short, value_name = "PREFIX")]
    pub out: PathBuf,

    /// Write the collapsed read-path probability matrix
    #[arg(long, default_value = "false")]
    pub write_probs: bool,

    // ============ Alignment Parameters ============
    /// Sequencing library strandedness
    #[arg(long, value_enum, default_value = "fr")]
    pub library_type: LibraryType,

    /// Maximum paired-end fragment length
    #[arg(long, default_value = "1000")]
    pub max_pair_frag_length: u32,

    /// Maximum unaligned interior bases tolerated when a traversal
    /// leaves the consistent haplotypes
    #[arg(long, default_value = "0")]
    pub max_internal_offset: u32,

    /// Drop reads whose minimum mapping quality is below this
    #[arg(long, default_value = "0")]
    pub min_mapq_filter: u32,

    /// Drop reads whose best score fraction is below this
    #[arg(long, default_value = "0.9")]
    pub min_best_score_filter: f64,

    /// Drop reads whose smallest soft-clip fraction exceeds this
    #[arg(long, default_value = "0.5")]
    pub max_softclip_filter: f64,

    /// Fragment length mean
    #[arg(long, default_value = "300.0")]
    pub frag_mean: f64,

    /// Fragment length standard deviation
    #[arg(long, default_value = "50.0")]
    pub frag_sd: f64,

    /// Log base converting alignment scores to log-likelihoods
    #[arg(long, default_value = "1.0")]
    pub score_log_base: f64,

    // ============ Inference Parameters ============
    /// Abundance inference model
    #[arg(long, value_enum, default_value = "em")]
    pub inference_model: InferenceModel,

    /// Maximum EM iterations
    #[arg(long, default_value = "10000")]
    pub max_em_its: u32,

    /// Maximum relative change under which EM counts as converged
    #[arg(long, default_value = "0.001")]
    pub max_rel_em_conv: f64,

    /// Number of Gibbs read-count samples (0 disables sampling)
    #[arg(long, default_value = "0")]
    pub num_gibbs_samples: u32,

    /// Gibbs iterations between recorded samples
    #[arg(long, default_value = "25")]
    pub gibbs_thin_its: u32,

    /// Probability values closer than this are considered equal
    #[arg(long, default_value = "1e-8")]
    pub prob_precision: f64,

    /// Path group size (ploidy) for nested inference
    #[arg(long, default_value = "2")]
    pub group_size: u32,

    /// Minimum posterior for a group to be retained
    #[arg(long, default_value = "0.01")]
    pub min_hap_prob: f64,

    /// Collapse paths sharing a source-id set before nested inference
    #[arg(long, default_value = "false")]
    pub infer_collapsed: bool,

    /// Estimate group posteriors by Gibbs sampling instead of
    /// enumeration
    #[arg(long, default_value = "false")]
    pub use_group_post_gibbs: bool,

    // ============ General Parameters ============
    /// Random seed
    #[arg(long, default_value = "622797")]
    pub seed: u64,

    /// Number of worker threads (0 = all cores)
    #[arg(long, short, default_value = "1")]
    pub threads: usize,
}

impl Config {
    /// Validate parameter ranges before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_pair_frag_length == 0 {
            return Err(QuantError::config("max-pair-frag-length must be positive"));
        }

        if !(0.0..=1.0).contains(&self.min_best_score_filter) {
            return Err(QuantError::config("min-best-score-filter must be in [0, 1]"));
        }

        if !(0.0..=1.0).contains(&self.max_softclip_filter) {
            return Err(QuantError::config("max-softclip-filter must be in [0, 1]"));
        }

        if self.frag_mean <= 0.0 || self.frag_sd <= 0.0 {
            return Err(QuantError::config("fragment length mean and sd must be positive"));
        }

        if self.max_em_its == 0 {
            return Err(QuantError::config("max-em-its must be positive"));
        }

        if !(self.prob_precision > 0.0 && self.prob_precision < 1.0) {
            return Err(QuantError::config("prob-precision must be in (0, 1)"));
        }

        if self.group_size == 0 {
            return Err(QuantError::config("group-size must be positive"));
        }

        if !(self.min_hap_prob > 0.0 && self.min_hap_prob <= 1.0) {
            return Err(QuantError::config("min-hap-prob must be in (0, 1]"));
        }

        if self.num_gibbs_samples > 0 && self.gibbs_thin_its == 0 {
            return Err(QuantError::config("gibbs-thin-its must be positive when sampling"));
        }

        Ok(())
    }

    /// Decimal digits implied by the probability precision.
    pub fn prob_precision_digits(&self) -> usize {
        (-self.prob_precision.log10()).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_config() -> Config {
        Config::parse_from([
            "graphquant",
            "--index",
            "index.json",
            "--clusters",
            "clusters.jsonl",
            "--out",
            "out",
        ])
    }

    #[test]
    fn test_defaults_validate() {
        let config = make_test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.library_type, LibraryType::Fr);
        assert_eq!(config.prob_precision_digits(), 8);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = make_test_config();
        config.min_best_score_filter = 1.5;
        assert!(config.validate().is_err());

        let mut config = make_test_config();
        config.prob_precision = 0.0;
        assert!(config.validate().is_err());

        let mut config = make_test_config();
        config.num_gibbs_samples = 10;
        config.gibbs_thin_its = 0;
        assert!(config.validate().is_err());
    }
}
