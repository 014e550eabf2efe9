//! # Estimates Writer
//!
//! TSV serialization of per-path abundance estimates. TPM values need
//! the run-wide normalizer, so rows accumulate across clusters and the
//! table is written on `finish`. A secondary table serializes group
//! posteriors for nested runs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::data::ClusterEstimates;
use crate::error::Result;

#[derive(Debug, Clone)]
struct EstimateRow {
    name: String,
    cluster_id: u32,
    length: u32,
    effective_length: f64,
    posterior: f64,
    cluster_relative_expression: f64,
    read_count: f64,
}

#[derive(Debug, Clone)]
struct GroupRow {
    names: Vec<String>,
    cluster_id: u32,
    posterior: f64,
}

/// Thread-safe collector and writer for the estimates table.
pub struct EstimatesWriter {
    rows: Mutex<Vec<EstimateRow>>,
    group_rows: Mutex<Vec<GroupRow>>,
    path: std::path::PathBuf,
}

impl EstimatesWriter {
    pub fn new(path: &Path) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            group_rows: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    /// Record one cluster's estimates.
    pub fn add_cluster(&self, cluster_id: u32, estimates: &ClusterEstimates) {
        let per_path = estimates.per_path_estimates();
        let cluster_total = estimates.total_read_count;

        let mut rows = self.rows.lock().expect("estimates writer poisoned");
        for (path, &(posterior, read_count)) in estimates.paths.iter().zip(&per_path) {
            rows.push(EstimateRow {
                name: path.name.clone(),
                cluster_id,
                length: path.length,
                effective_length: path.effective_length,
                posterior,
                cluster_relative_expression: if cluster_total > 0.0 {
                    read_count / cluster_total
                } else {
                    0.0
                },
                read_count,
            });
        }
        drop(rows);

        if estimates
            .path_group_sets
            .iter()
            .any(|group| group.len() > 1)
        {
            let mut group_rows = self.group_rows.lock().expect("estimates writer poisoned");

            for (group, &posterior) in estimates
                .path_group_sets
                .iter()
                .zip(&estimates.posteriors)
            {
                group_rows.push(GroupRow {
                    names: group
                        .iter()
                        .map(|&idx| estimates.paths[idx as usize].name.clone())
                        .collect(),
                    cluster_id,
                    posterior,
                });
            }
        }
    }

    /// Write the collected tables. The TPM normalizer spans the whole
    /// run, so this is a single pass at the end.
    pub fn finish(&self) -> Result<()> {
        let rows = self.rows.lock().expect("estimates writer poisoned");

        let normalizer: f64 = rows
            .iter()
            .filter(|row| row.effective_length > 0.0)
            .map(|row| row.read_count / row.effective_length)
            .sum();

        let mut stream = BufWriter::new(File::create(&self.path)?);
        writeln!(
            stream,
            "Name\tClusterID\tLength\tEffectiveLength\tHaplotypeProbability\t\
             ClusterRelativeExpression\tReadCount\tTPM"
        )?;

        for row in rows.iter() {
            let tpm = if row.effective_length > 0.0 && normalizer > 0.0 {
                row.read_count / row.effective_length / normalizer * 1e6
            } else {
                0.0
            };

            writeln!(
                stream,
                "{}\t{}\t{}\t{:.3}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
                row.name,
                row.cluster_id,
                row.length,
                row.effective_length,
                row.posterior,
                row.cluster_relative_expression,
                row.read_count,
                tpm
            )?;
        }
        stream.flush()?;
        drop(rows);

        let group_rows = self.group_rows.lock().expect("estimates writer poisoned");
        if group_rows.is_empty() {
            return Ok(());
        }

        let group_size = group_rows[0].names.len();
        let group_path = self.path.with_extension("groups.txt");
        let mut stream = BufWriter::new(File::create(&group_path)?);

        for idx in 1..=group_size {
            write!(stream, "Name{}\t", idx)?;
        }
        writeln!(stream, "ClusterID\tPosterior")?;

        for row in group_rows.iter() {
            for name in &row.names {
                write!(stream, "{}\t", name)?;
            }
            writeln!(stream, "{}\t{:.6}", row.cluster_id, row.posterior)?;
        }
        stream.flush()?;

        Ok(())
    }
}
