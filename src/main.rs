//! # Application Entry Point
//!
//! Parse the CLI, initialize logging and the thread pool, load the
//! haplotype index and the cluster stream, then run the quantification
//! pipeline. Exits non-zero on IO or parse failure.

use std::fs::File;
use std::io::BufReader;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;

use graphquant::config::Config;
use graphquant::index::PathIndexDef;
use graphquant::io::{read_clusters, EstimatesWriter, ProbMatrixWriter};
use graphquant::pipelines::QuantificationPipeline;
use graphquant::utils::threading::build_thread_pool;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    config.validate()?;

    let start = Instant::now();

    let index_def: PathIndexDef = serde_json::from_reader(BufReader::new(
        File::open(&config.index)
            .with_context(|| format!("cannot open index {}", config.index.display()))?,
    ))
    .context("malformed index description")?;
    let index = index_def.build()?;

    let clusters = read_clusters(&config.clusters)
        .with_context(|| format!("cannot read clusters {}", config.clusters.display()))?;
    log::info!(
        "Loaded {} clusters over {} paths",
        clusters.len(),
        index.path_count()
    );

    let estimates_path = config.out.with_extension("estimates.tsv");
    let estimates_writer = EstimatesWriter::new(&estimates_path);

    let prob_writer = if config.write_probs {
        let probs_path = config.out.with_extension("probs.txt");
        Some(ProbMatrixWriter::open(Some(&probs_path), config.prob_precision)?)
    } else {
        None
    };

    let pool = build_thread_pool(config.threads)?;
    let pipeline = QuantificationPipeline::new(&config, &index)?;

    pool.install(|| pipeline.run(&clusters, &estimates_writer, prob_writer.as_ref()))?;

    estimates_writer.finish()?;
    if let Some(writer) = &prob_writer {
        writer.flush()?;
    }

    log::info!(
        "Wrote estimates for {} clusters to {} in {:.1?}",
        clusters.len(),
        estimates_path.display(),
        start.elapsed()
    );

    Ok(())
}
