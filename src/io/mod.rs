//! # Output Writers
//!
//! Thread-safe serializers for the estimates table and the collapsed
//! read-path probability matrix. Both hold a mutex around a buffered
//! stream (file or stdout) and flush on drop.

pub mod cluster_stream;
pub mod estimates;
pub mod prob_matrix;

pub use cluster_stream::{read_clusters, Cluster, ClusterRead};
pub use estimates::EstimatesWriter;
pub use prob_matrix::ProbMatrixWriter;
