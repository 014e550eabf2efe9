//! # Model Module
//!
//! ## Role
//! The inference core: alignment-to-path matching and the probabilistic
//! abundance machinery.
//!
//! ## Sub-modules
//! - `read_stats`: per-read bookkeeping (soft-clips, internal offsets)
//! - `search_path`: mutable search candidates and finished alignment paths
//! - `path_finder`: search-state expansion, multipath DFS, mate pairing
//! - `probabilities`: per-read path probability vectors with collapsing
//! - `matrix`: dense probability matrix assembly and normalization
//! - `abundance`: EM, minimum path cover and nested estimators
//! - `posterior`: path group (diplotype) posterior calculators

pub mod abundance;
pub mod matrix;
pub mod path_finder;
pub mod posterior;
pub mod probabilities;
pub mod read_stats;
pub mod search_path;

pub use abundance::PathClusterEstimator;
pub use path_finder::AlignmentPathFinder;
pub use probabilities::{collapse_probabilities, ReadPathProbabilities};
pub use search_path::{AlignmentPath, AlignmentSearchPath};
