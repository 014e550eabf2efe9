//! # Collapsed Probability Matrix Writer
//!
//! Text serialization of the per-cluster collapsed read-path
//! probabilities: a `#` separator line, the cluster's paths, then one
//! line per collapsed read. Probability digits follow the configured
//! precision.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::data::PathInfo;
use crate::error::Result;
use crate::model::probabilities::ReadPathProbabilities;

/// Thread-safe writer for the collapsed probability matrix.
pub struct ProbMatrixWriter {
    stream: Mutex<BufWriter<Box<dyn Write + Send>>>,
    prob_precision: f64,
    precision_digits: usize,
}

impl ProbMatrixWriter {
    /// Open a writer on the given file, or stdout when `path` is
    /// `None`.
    pub fn open(path: Option<&Path>, prob_precision: f64) -> Result<Self> {
        let sink: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };

        Ok(Self {
            stream: Mutex::new(BufWriter::new(sink)),
            prob_precision,
            precision_digits: (-prob_precision.log10()).ceil() as usize,
        })
    }

    /// Write one cluster block: paths header plus one line per
    /// collapsed read.
    pub fn write_cluster(
        &self,
        cluster_probs: &[ReadPathProbabilities],
        cluster_paths: &[PathInfo],
    ) -> Result<()> {
        debug_assert!(!cluster_paths.is_empty());

        let mut stream = self.stream.lock().expect("probability writer poisoned");

        writeln!(stream, "#")?;

        for (idx, path) in cluster_paths.iter().enumerate() {
            if idx > 0 {
                write!(stream, " ")?;
            }
            write!(
                stream,
                "{},{},{:.3}",
                path.name, path.length, path.effective_length
            )?;
        }
        writeln!(stream)?;

        for read_probs in cluster_probs {
            debug_assert!(read_probs.num_paths() <= cluster_paths.len());
            self.write_collapsed_line(&mut stream, read_probs)?;
        }

        Ok(())
    }

    fn write_collapsed_line(
        &self,
        stream: &mut BufWriter<Box<dyn Write + Send>>,
        read_probs: &ReadPathProbabilities,
    ) -> Result<()> {
        write!(
            stream,
            "{} {:.digits$}",
            read_probs.read_count(),
            read_probs.noise_prob(self.prob_precision),
            digits = self.precision_digits
        )?;

        for (prob, cols) in read_probs.collapsed_probs(self.prob_precision) {
            write!(stream, " {:.digits$}:", prob, digits = self.precision_digits)?;

            for (idx, col) in cols.iter().enumerate() {
                if idx > 0 {
                    write!(stream, ",")?;
                }
                write!(stream, "{}", col)?;
            }
        }

        writeln!(stream)?;
        Ok(())
    }

    /// Flush buffered output; also performed on drop.
    pub fn flush(&self) -> Result<()> {
        self.stream
            .lock()
            .expect("probability writer poisoned")
            .flush()?;
        Ok(())
    }
}

impl Drop for ProbMatrixWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PathInfo;
    use crate::math::FragmentLengthDist;
    use crate::model::search_path::AlignmentPath;
    use std::collections::HashMap;

    const PRECISION: f64 = 1e-3;

    fn make_test_cluster() -> (Vec<ReadPathProbabilities>, Vec<PathInfo>) {
        let paths: Vec<PathInfo> = (0..2)
            .map(|i| PathInfo {
                name: format!("transcript_{}", i),
                length: 500,
                effective_length: 420.5,
                source_ids: vec![i],
                group_id: i,
                source_count: 1,
            })
            .collect();

        let index: HashMap<u32, usize> = (0..2).map(|i| (i, i as usize)).collect();
        let read = ReadPathProbabilities::from_alignment_paths(
            &[AlignmentPath {
                frag_length: 300,
                mapq_prob: 0.0,
                score_sum: 10,
                slack: 0,
                ids: vec![0, 1],
            }],
            &index,
            &paths,
            &FragmentLengthDist::new(300.0, 50.0).unwrap(),
            true,
            1.0,
            PRECISION,
        );

        (vec![read], paths)
    }

    #[test]
    fn test_cluster_block_format() {
        let dir = std::env::temp_dir().join("graphquant_prob_writer_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("probs.txt");

        let (reads, paths) = make_test_cluster();
        {
            let writer = ProbMatrixWriter::open(Some(&path), PRECISION).unwrap();
            writer.write_cluster(&reads, &paths).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], "#");
        assert_eq!(
            lines[1],
            "transcript_0,500,420.500 transcript_1,500,420.500"
        );
        // One read, no noise, both paths at 0.5.
        assert_eq!(lines[2], "1 0.000 0.500:0,1");

        std::fs::remove_file(&path).unwrap();
    }
}
