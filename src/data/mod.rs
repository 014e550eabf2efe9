//! # Data Module
//!
//! ## Role
//! In-memory representations of the quantification inputs and outputs.
//!
//! ## Design Philosophy
//! - **Zero-cost newtypes:** `NodeHandle` packs a node id and an
//!   orientation bit into one word and prevents id/handle mix-ups at
//!   compile time.
//! - **Enum-based polymorphism:** single-path and multipath alignments
//!   are one tagged `Alignment` enum with dispatch methods rather than
//!   parallel type hierarchies.
//!
//! ## Sub-modules
//! - `node`: oriented node handles
//! - `alignment`: mappings, subpath DAGs and the alignment variants
//! - `path_info`: per-path metadata and per-cluster estimate containers

pub mod alignment;
pub mod node;
pub mod path_info;

pub use alignment::{Alignment, MappedPath, Mapping, Subpath};
pub use node::NodeHandle;
pub use path_info::{ClusterEstimates, CountSamples, PathInfo};
