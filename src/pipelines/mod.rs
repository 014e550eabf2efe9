//! # Pipelines Module
//!
//! High-level orchestration: the quantification workflow over a
//! cluster stream.

pub mod quantify;

pub use quantify::QuantificationPipeline;
