//! # Cluster Stream Reader
//!
//! JSON-lines input: one cluster per line, carrying the cluster id,
//! the cluster's reference paths (with their global index path ids)
//! and its reads.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::{Alignment, PathInfo};
use crate::error::{QuantError, Result};

/// One read of a cluster: a single-end alignment or a mate pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRead {
    Single(Box<Alignment>),
    Paired(Box<Alignment>, Box<Alignment>),
}

/// One independent unit of inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: u32,
    /// Per-path metadata, parallel to `path_ids`.
    pub paths: Vec<PathInfo>,
    /// Global index path id of each cluster path.
    pub path_ids: Vec<u32>,
    pub reads: Vec<ClusterRead>,
}

impl Cluster {
    /// Structural checks; a failing cluster is skipped, not fatal.
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(QuantError::invalid_data(format!(
                "cluster {} has no paths",
                self.cluster_id
            )));
        }

        if self.paths.len() != self.path_ids.len() {
            return Err(QuantError::invalid_data(format!(
                "cluster {}: {} paths but {} path ids",
                self.cluster_id,
                self.paths.len(),
                self.path_ids.len()
            )));
        }

        Ok(())
    }
}

/// Read all clusters from a JSON-lines file.
pub fn read_clusters(path: &Path) -> Result<Vec<Cluster>> {
    if !path.exists() {
        return Err(QuantError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let reader = BufReader::new(File::open(path)?);
    let mut clusters = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let cluster: Cluster = serde_json::from_str(&line)
            .map_err(|err| QuantError::parse(line_idx + 1, err.to_string()))?;
        clusters.push(cluster);
    }

    Ok(clusters)
}
