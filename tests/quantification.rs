//! End-to-end quantification scenarios: synthetic index and cluster
//! fixtures pushed through the full pipeline, with assertions on the
//! written output tables.

use std::collections::HashMap;
use std::fs;

use clap::Parser;

use graphquant::config::Config;
use graphquant::data::alignment::{MappedPath, Mapping};
use graphquant::data::{Alignment, NodeHandle, PathInfo};
use graphquant::index::PathIndex;
use graphquant::io::{Cluster, ClusterRead, EstimatesWriter, ProbMatrixWriter};
use graphquant::pipelines::QuantificationPipeline;

fn make_config(args: &[&str]) -> Config {
    let mut argv = vec![
        "graphquant",
        "--index",
        "index.json",
        "--clusters",
        "clusters.jsonl",
        "--out",
        "out",
        "--min-best-score-filter",
        "0.0",
    ];
    argv.extend_from_slice(args);
    Config::parse_from(argv)
}

fn handle(id: u64) -> NodeHandle {
    NodeHandle::forward(id)
}

/// Nodes 1..=4 of 50 bp. Path 42: 1>2, path 43: 1>3, path 44: 4.
fn make_index() -> PathIndex {
    let node_lengths: HashMap<u64, u32> = (1..=4).map(|id| (id, 50)).collect();
    PathIndex::new(
        node_lengths,
        vec![
            (42, vec![handle(1), handle(2)]),
            (43, vec![handle(1), handle(3)]),
            (44, vec![handle(4)]),
        ],
        false,
    )
    .unwrap()
}

fn make_path_info(name: &str, group_id: u32) -> PathInfo {
    PathInfo {
        name: name.to_string(),
        length: 100,
        effective_length: 0.0,
        source_ids: vec![group_id],
        group_id,
        source_count: 1,
    }
}

fn single_read_on(node_id: u64, mapq: u32) -> ClusterRead {
    ClusterRead::Single(Box::new(Alignment::Single {
        path: MappedPath::new(vec![Mapping {
            node: handle(node_id),
            offset: 0,
            from_length: 50,
            to_length: 50,
        }]),
        sequence_length: 50,
        mapping_quality: mapq,
        score: 50,
        quality: None,
    }))
}

fn paired_read(first_node: u64, second_node: u64) -> ClusterRead {
    let mate = |node_id: u64, reverse: bool| {
        let node = if reverse {
            handle(node_id).reverse()
        } else {
            handle(node_id)
        };
        Box::new(Alignment::Single {
            path: MappedPath::new(vec![Mapping {
                node,
                offset: 0,
                from_length: 50,
                to_length: 50,
            }]),
            sequence_length: 50,
            mapping_quality: 60,
            score: 50,
            quality: None,
        })
    };

    ClusterRead::Paired(mate(first_node, false), mate(second_node, true))
}

struct RunOutput {
    estimates: Vec<HashMap<String, String>>,
    probs: Option<String>,
    groups: Option<String>,
}

fn run_pipeline(config: &Config, clusters: &[Cluster], write_probs: bool) -> RunOutput {
    let dir = std::env::temp_dir().join(format!(
        "graphquant_e2e_{}_{:p}",
        std::process::id(),
        clusters
    ));
    fs::create_dir_all(&dir).unwrap();

    let index = make_index();
    let pipeline = QuantificationPipeline::new(config, &index).unwrap();

    let estimates_path = dir.join("estimates.tsv");
    let estimates_writer = EstimatesWriter::new(&estimates_path);

    let probs_path = dir.join("probs.txt");
    let prob_writer = if write_probs {
        Some(ProbMatrixWriter::open(Some(&probs_path), config.prob_precision).unwrap())
    } else {
        None
    };

    pipeline
        .run(clusters, &estimates_writer, prob_writer.as_ref())
        .unwrap();
    estimates_writer.finish().unwrap();
    drop(prob_writer);

    let contents = fs::read_to_string(&estimates_path).unwrap();
    let mut lines = contents.lines();
    let header: Vec<String> = lines.next().unwrap().split('\t').map(String::from).collect();

    let estimates = lines
        .map(|line| {
            header
                .iter()
                .cloned()
                .zip(line.split('\t').map(String::from))
                .collect()
        })
        .collect();

    let probs = write_probs.then(|| fs::read_to_string(&probs_path).unwrap());
    let groups = fs::read_to_string(estimates_path.with_extension("groups.txt")).ok();

    fs::remove_dir_all(&dir).unwrap();
    RunOutput {
        estimates,
        probs,
        groups,
    }
}

fn read_count(row: &HashMap<String, String>) -> f64 {
    row["ReadCount"].parse().unwrap()
}

#[test]
fn test_single_read_single_path() {
    let config = make_config(&[]);

    // The read sits on node 4, which only path 44 visits.
    let clusters = vec![Cluster {
        cluster_id: 1,
        paths: vec![make_path_info("t44", 0)],
        path_ids: vec![44],
        reads: vec![single_read_on(4, 60)],
    }];

    let out = run_pipeline(&config, &clusters, false);

    assert_eq!(out.estimates.len(), 1);
    let row = &out.estimates[0];
    assert_eq!(row["Name"], "t44");
    assert!((read_count(row) - 1.0).abs() < 1e-6);
    assert!((row["HaplotypeProbability"].parse::<f64>().unwrap() - 1.0).abs() < 1e-9);
    assert!((row["ClusterRelativeExpression"].parse::<f64>().unwrap() - 1.0).abs() < 1e-6);
}

#[test]
fn test_two_equally_likely_paths_split_evenly() {
    let config = make_config(&[]);

    // Node 1 is shared by paths 42 and 43 with equal haplotype counts.
    let clusters = vec![Cluster {
        cluster_id: 1,
        paths: vec![make_path_info("t42", 0), make_path_info("t43", 1)],
        path_ids: vec![42, 43],
        reads: vec![single_read_on(1, 60), single_read_on(1, 60)],
    }];

    let out = run_pipeline(&config, &clusters, false);

    assert_eq!(out.estimates.len(), 2);
    for row in &out.estimates {
        assert!((read_count(row) - 1.0).abs() < 1e-3, "row {:?}", row);
    }
}

#[test]
fn test_noise_only_read_does_not_contribute() {
    let config = make_config(&[]);

    // A zero-mapq read is pure noise; only the confident read counts.
    let clusters = vec![Cluster {
        cluster_id: 1,
        paths: vec![make_path_info("t44", 0)],
        path_ids: vec![44],
        reads: vec![single_read_on(4, 60), single_read_on(4, 0)],
    }];

    let out = run_pipeline(&config, &clusters, false);

    assert!((read_count(&out.estimates[0]) - 1.0).abs() < 1e-6);
}

#[test]
fn test_paired_reads_bridge_a_shared_node() {
    let config = make_config(&[]);

    // Mate 1 on node 1, mate 2 on node 2: consistent only with path
    // 42 (node 3 belongs to path 43).
    let clusters = vec![Cluster {
        cluster_id: 1,
        paths: vec![make_path_info("t42", 0), make_path_info("t43", 1)],
        path_ids: vec![42, 43],
        reads: vec![paired_read(1, 2)],
    }];

    let out = run_pipeline(&config, &clusters, false);

    let by_name: HashMap<&str, f64> = out
        .estimates
        .iter()
        .map(|row| (row["Name"].as_str(), read_count(row)))
        .collect();
    assert!((by_name["t42"] - 1.0).abs() < 1e-6);
    assert!(by_name["t43"] < 1e-6);
}

#[test]
fn test_probability_matrix_blocks() {
    let config = make_config(&["--write-probs"]);

    let clusters = vec![
        Cluster {
            cluster_id: 1,
            paths: vec![make_path_info("t42", 0), make_path_info("t43", 1)],
            path_ids: vec![42, 43],
            reads: vec![single_read_on(1, 60), single_read_on(1, 60)],
        },
        Cluster {
            cluster_id: 2,
            paths: vec![make_path_info("t44", 0)],
            path_ids: vec![44],
            reads: vec![single_read_on(4, 60)],
        },
    ];

    let out = run_pipeline(&config, &clusters, true);
    let probs = out.probs.unwrap();
    let lines: Vec<&str> = probs.lines().collect();

    // Two cluster blocks, each starting with '#'.
    assert_eq!(lines.iter().filter(|l| **l == "#").count(), 2);
    assert!(lines[1].starts_with("t42,100,"));

    // The duplicate reads collapsed into one line with count 2.
    let read_line = lines[2];
    assert!(read_line.starts_with("2 "), "line: {}", read_line);
    assert!(read_line.contains(":0,1"), "line: {}", read_line);
}

#[test]
fn test_nested_inference_writes_group_posteriors() {
    let config = make_config(&[
        "--inference-model",
        "nested",
        "--group-size",
        "2",
        "--min-hap-prob",
        "0.01",
    ]);

    // Both paths share one transcript group.
    let mut paths = vec![make_path_info("h0", 0), make_path_info("h1", 0)];
    paths[1].source_ids = vec![1];

    let clusters = vec![Cluster {
        cluster_id: 1,
        paths,
        path_ids: vec![42, 43],
        reads: vec![
            single_read_on(2, 60),
            single_read_on(2, 60),
            single_read_on(3, 60),
        ],
    }];

    let out = run_pipeline(&config, &clusters, false);

    // All three reads are assigned somewhere and totals hold.
    let total: f64 = out.estimates.iter().map(read_count).sum();
    assert!((total - 3.0).abs() < 0.2, "total {}", total);

    // Posteriors stay within [0, 1].
    for row in &out.estimates {
        let posterior: f64 = row["HaplotypeProbability"].parse().unwrap();
        assert!((0.0..=1.0 + 1e-9).contains(&posterior));
    }

    // Diplotype groups get their own posterior table.
    let groups = out.groups.expect("group posterior table written");
    let mut group_lines = groups.lines();
    assert_eq!(group_lines.next(), Some("Name1\tName2\tClusterID\tPosterior"));
    assert!(group_lines.next().is_some());
}

#[test]
fn test_identical_runs_produce_identical_output() {
    let config = make_config(&["--num-gibbs-samples", "10", "--seed", "1234"]);

    let make_clusters = || {
        vec![Cluster {
            cluster_id: 1,
            paths: vec![make_path_info("t42", 0), make_path_info("t43", 1)],
            path_ids: vec![42, 43],
            reads: vec![single_read_on(1, 60), single_read_on(2, 60)],
        }]
    };

    let first = run_pipeline(&config, &make_clusters(), false);
    let second = run_pipeline(&config, &make_clusters(), false);

    assert_eq!(first.estimates, second.estimates);
}

#[test]
fn test_unknown_alignment_is_noise_not_fatal() {
    let config = make_config(&[]);

    // One read starts on a node absent from the index; it is skipped
    // at the cluster level, never aborting the run.
    let clusters = vec![Cluster {
        cluster_id: 1,
        paths: vec![make_path_info("t44", 0)],
        path_ids: vec![44],
        reads: vec![single_read_on(99, 60), single_read_on(4, 60)],
    }];

    let out = run_pipeline(&config, &clusters, false);
    assert!((read_count(&out.estimates[0]) - 1.0).abs() < 1e-6);
}
