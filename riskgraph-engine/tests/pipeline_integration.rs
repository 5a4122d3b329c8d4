use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use riskgraph_core::models::TransactionRecord;
use riskgraph_core::{EngineConfig, EngineError, FeatureModel};
use riskgraph_engine::subsystems::embedder::EmbeddingSource;
use riskgraph_engine::{AnalysisPipeline, AnalysisRequest};

fn record(step: i64, kind: &str, amount: f64, orig: &str, dest: &str) -> TransactionRecord {
    TransactionRecord {
        step: Some(step),
        kind: Some(kind.to_string()),
        amount: Some(amount),
        name_orig: Some(orig.to_string()),
        name_dest: Some(dest.to_string()),
        oldbalance_org: Some(amount * 2.0),
        newbalance_orig: Some(amount),
        oldbalance_dest: Some(0.0),
        newbalance_dest: Some(amount),
        ..TransactionRecord::default()
    }
}

/// A laundering chain through C1..C4 plus ordinary merchant payments.
fn dataset() -> Vec<TransactionRecord> {
    let mut records = vec![
        record(1, "TRANSFER", 900_000.0, "C1", "C2"),
        record(1, "CASH_OUT", 890_000.0, "C2", "C3"),
        record(2, "TRANSFER", 1_500_000.0, "C3", "C4"),
        record(2, "CASH_OUT", 1_450_000.0, "C4", "C1"),
        record(3, "TRANSFER", 250_000.0, "C1", "C5"),
    ];
    for i in 0..40 {
        records.push(record(
            4 + i / 10,
            "PAYMENT",
            50.0 + i as f64,
            &format!("C{}", 100 + i),
            &format!("M{}", i % 6),
        ));
    }
    records
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scoring.seed = Some(7);
    config
}

fn request(records: Vec<TransactionRecord>) -> AnalysisRequest {
    AnalysisRequest {
        step_origin: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..AnalysisRequest::new(records)
    }
}

#[test]
fn test_empty_input_is_an_error() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let err = pipeline.run(request(Vec::new())).unwrap_err();
    assert!(matches!(err, EngineError::NoInputData));
}

#[test]
fn test_invalid_config_rejected_before_running() {
    let mut config = config();
    config.clustering.min_samples = 0;
    assert!(matches!(
        AnalysisPipeline::new(config),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn test_full_run_without_model() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let report = pipeline.run(request(dataset())).unwrap();

    assert_eq!(report.transactions_analyzed, 45);
    assert_eq!(report.embedding_source, Some(EmbeddingSource::Random));

    // Every node has a risk in [0, 1] and a fixed-width embedding
    assert_eq!(report.node_risks.len(), report.graph.node_count());
    assert!(report.node_risks.values().all(|r| (0.0..=1.0).contains(r)));
    let embeddings = report.embeddings();
    assert_eq!(embeddings.len(), report.graph.node_count());
    assert!(embeddings.values().all(|e| e.len() == 32));

    // Potential edges never duplicate observed ones or loop
    let observed: HashSet<(&str, &str)> = report
        .graph
        .edges()
        .iter()
        .filter(|e| !e.is_potential)
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    for link in &report.potential_edges {
        assert_ne!(link.source, link.target);
        assert!(!observed.contains(&(link.source.as_str(), link.target.as_str())));
    }

    // Clusters are disjoint
    let mut seen = HashSet::new();
    for cluster in &report.clusters {
        for member in &cluster.members {
            assert!(seen.insert(member.node.clone()));
        }
    }

    let summary = report.summary.as_ref().expect("summary requested");
    let stats = &summary.optimization_info;
    assert!(stats.optimized_node_count <= stats.original_node_count);
    assert_eq!(stats.original_node_count, report.graph.node_count());
    assert_eq!(summary.potential_edges_count, report.potential_edges.len());
}

#[test]
fn test_alerts_follow_scored_transactions() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let report = pipeline.run(request(dataset())).unwrap();

    assert!(!report.alerts.is_empty());
    assert!(report.alerts.iter().all(|a| a.risk_score > 0.7));
    assert_eq!(report.scoring.scored, 45);
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let first = pipeline.run(request(dataset())).unwrap();
    let second = pipeline.run(request(dataset())).unwrap();

    assert_eq!(first.node_risks, second.node_risks);
    assert_eq!(first.potential_edges, second.potential_edges);
    assert_eq!(
        serde_json::to_value(&first.clusters).unwrap(),
        serde_json::to_value(&second.clusters).unwrap()
    );
    assert_eq!(first.summary, second.summary);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_window_leaving_nothing_gives_empty_report() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let far_future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let report = pipeline
        .run(AnalysisRequest {
            start: Some(far_future),
            ..request(dataset())
        })
        .unwrap();

    assert_eq!(report.transactions_analyzed, 0);
    assert!(report.graph.is_empty());
    assert!(report.summary.is_none());
    // Scoring still reports on every row
    assert_eq!(report.scoring.scored, 45);
}

#[test]
fn test_malformed_rows_reported() {
    let mut records = dataset();
    records.push(TransactionRecord {
        step: Some(1),
        ..TransactionRecord::default()
    });

    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let report = pipeline.run(request(records)).unwrap();

    assert_eq!(report.malformed.len(), 1);
    assert_eq!(report.malformed[0].index, 45);
    assert_eq!(report.transactions_analyzed, 45);
}

#[test]
fn test_feature_model_and_accelerated_pool() {
    let mut config = config();
    config.compute.accelerated = true;
    config.compute.worker_threads = 2;
    config.embedding.accelerated_batch_size = 8;

    let pipeline = AnalysisPipeline::new(config)
        .unwrap()
        .with_model(Some(Arc::new(FeatureModel::new(32))));
    let report = pipeline.run(request(dataset())).unwrap();

    assert_eq!(report.embedding_source, Some(EmbeddingSource::Model));
    assert!(report.node_risks.values().all(|r| (0.0..=1.0).contains(r)));
    assert_eq!(report.embeddings().len(), report.graph.node_count());
}

#[test]
fn test_previous_graph_keeps_accumulating() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let first = pipeline.run(request(dataset())).unwrap();
    let nodes_before = first.graph.node_count();
    let c1_count = first.graph.node("C1").unwrap().transaction_count;

    let report = pipeline
        .run(AnalysisRequest {
            previous: Some(first.graph),
            ..request(vec![record(9, "TRANSFER", 1_000.0, "C1", "C999")])
        })
        .unwrap();

    assert_eq!(report.graph.node_count(), nodes_before + 1);
    assert_eq!(
        report.graph.node("C1").unwrap().transaction_count,
        c1_count + 1
    );
}

#[test]
fn test_report_serializes_to_json() {
    let pipeline = AnalysisPipeline::new(config()).unwrap();
    let report = pipeline.run(request(dataset())).unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert!(json["graph"]["nodes"].is_array());
    assert!(json["summary"]["optimization_info"]["original_node_count"].is_u64());
    assert!(json["node_risks"]["C1"].is_f64());
}
