//! Analysis pipeline: one request-scoped pass from raw records to report
//!
//! score → alerts → window + sampling → graph → embeddings + node risk →
//! link prediction → clustering → enrichment → optional summary
//!
//! The pipeline owns no mutable state between runs. Every stage receives its
//! inputs and returns owned results; randomness flows from one seeded `StdRng`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use riskgraph_core::models::{
    Alert, Cluster, MalformedRow, PotentialEdge, SummarizedGraph, TransactionRecord,
};
use riskgraph_core::{
    generate_alerts, load_model, EngineConfig, EngineError, GaussianNoise, GraphBuilder,
    RiskScorer, ScoringModel, ScoringReport, TransactionGraph,
};
use serde::Serialize;
use uuid::Uuid;

use crate::subsystems::cluster::{detect_clusters, ClusterMethod};
use crate::subsystems::embedder::{compute_embeddings, EmbeddingSource};
use crate::subsystems::ingest::{filter_window, sample_transactions};
use crate::subsystems::linker::predict_links;
use crate::subsystems::propagate::propagate_risk;
use crate::subsystems::summarize::summarize_graph;

/// Hour offsets in `step` records count from this far before the run.
const STEP_ORIGIN_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub records: Vec<TransactionRecord>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Use the loaded scoring model; when false every stage takes its fallback.
    pub use_model: bool,
    /// Attach a budget-bounded summary to the report.
    pub optimize: bool,
    /// Graph from an earlier run to keep accumulating into.
    pub previous: Option<TransactionGraph>,
    pub step_origin: Option<DateTime<Utc>>,
}

impl AnalysisRequest {
    pub fn new(records: Vec<TransactionRecord>) -> Self {
        Self {
            records,
            start: None,
            end: None,
            use_model: true,
            optimize: true,
            previous: None,
            step_origin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub transactions_analyzed: usize,
    pub malformed: Vec<MalformedRow>,
    pub scoring: ScoringReport,
    pub alerts: Vec<Alert>,
    /// Enriched graph: propagated node risk, embeddings, cluster ids and
    /// potential edges appended after the observed ones.
    pub graph: TransactionGraph,
    pub node_risks: BTreeMap<String, f64>,
    pub potential_edges: Vec<PotentialEdge>,
    pub clusters: Vec<Cluster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_method: Option<ClusterMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_source: Option<EmbeddingSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummarizedGraph>,
}

impl AnalysisReport {
    fn empty(
        run_id: Uuid,
        malformed: Vec<MalformedRow>,
        scoring: ScoringReport,
        alerts: Vec<Alert>,
    ) -> Self {
        Self {
            run_id,
            generated_at: Utc::now(),
            transactions_analyzed: 0,
            malformed,
            scoring,
            alerts,
            graph: TransactionGraph::default(),
            node_risks: BTreeMap::new(),
            potential_edges: Vec::new(),
            clusters: Vec::new(),
            cluster_method: None,
            embedding_source: None,
            summary: None,
        }
    }

    /// Embedding per node id.
    pub fn embeddings(&self) -> BTreeMap<&str, &[f32]> {
        self.graph
            .nodes()
            .iter()
            .filter_map(|n| Some((n.id.as_str(), n.embedding.as_deref()?)))
            .collect()
    }
}

pub struct AnalysisPipeline {
    config: EngineConfig,
    model: Option<Arc<dyn ScoringModel>>,
    pool: Option<rayon::ThreadPool>,
}

impl AnalysisPipeline {
    /// Validate the config, load the configured model and size the worker pool.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let model = load_model(&config.model, config.embedding.dimensions);
        let pool = if config.compute.accelerated {
            let threads = match config.compute.worker_threads {
                0 => num_cpus::get(),
                n => n,
            };
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("riskgraph-worker-{i}"))
                .build()
                .map_err(|e| EngineError::Other(format!("worker pool: {e}")))?;
            tracing::info!(threads, "Accelerated execution enabled");
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            config,
            model,
            pool,
        })
    }

    /// Replace the loaded model, or remove it with `None`.
    pub fn with_model(mut self, model: Option<Arc<dyn ScoringModel>>) -> Self {
        self.model = model;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport, EngineError> {
        if request.records.is_empty() {
            return Err(EngineError::NoInputData);
        }
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let config = &self.config;
        tracing::info!(%run_id, records = request.records.len(), "Starting analysis");

        let mut rng = match config.scoring.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Scoring
        let origin = request
            .step_origin
            .unwrap_or_else(|| Utc::now() - Duration::days(STEP_ORIGIN_DAYS));
        let noise = GaussianNoise::new(config.scoring.jitter_sigma, Some(rng.gen()))?;
        let outcome = RiskScorer::new(config.thresholds.clone(), noise)
            .with_step_origin(origin)
            .score(&request.records);
        let alerts = generate_alerts(&outcome.transactions, &config.thresholds);

        // Narrowing
        let txs = filter_window(outcome.transactions, request.start, request.end);
        let txs = sample_transactions(txs, &config.sampling, config.thresholds.high_risk, &mut rng);
        if txs.is_empty() {
            tracing::warn!(%run_id, "No transactions left to analyze");
            return Ok(AnalysisReport::empty(run_id, outcome.malformed, outcome.report, alerts));
        }

        // Graph
        let mut builder = match request.previous {
            Some(previous) => GraphBuilder::extend(previous),
            None => GraphBuilder::new(),
        };
        builder.add_all(&txs);
        let mut graph = builder.build();
        let features = graph.features();

        // Node analysis
        let model = if request.use_model {
            self.model.as_deref()
        } else {
            None
        };
        let accelerated = config.compute.accelerated;
        let mut analyze = || {
            let embedding = compute_embeddings(model, &features, config, &mut rng);
            let propagation = propagate_risk(model, &features, config);
            let usable = embedding.is_usable().then(|| embedding.embeddings.view());
            let links = predict_links(
                &graph,
                usable,
                &propagation.risks,
                &config.link_prediction,
                &config.thresholds,
            );
            let clusters = detect_clusters(
                &graph,
                usable,
                &propagation.risks,
                &config.clustering,
                accelerated,
                &mut rng,
            );
            (embedding, propagation, links, clusters)
        };
        let (embedding, propagation, links, clusters) = match &self.pool {
            Some(pool) => pool.install(analyze),
            None => analyze(),
        };

        // Enrichment
        let mut node_risks = BTreeMap::new();
        for i in 0..graph.node_count() {
            if let Some(node) = graph.node_mut(i) {
                node.risk_score = propagation.risks[i].clamp(0.0, 1.0);
                node.embedding = Some(embedding.embeddings.row(i).to_vec());
                node.cluster_id = clusters.assignments[i];
                node_risks.insert(node.id.clone(), node.risk_score);
            }
        }
        let added = links.iter().filter(|l| graph.add_potential_edge(l)).count();
        tracing::debug!(added, "Appended potential edges");

        let summary = request.optimize.then(|| {
            summarize_graph(
                &graph,
                &clusters.clusters,
                links.len(),
                &config.summary,
                &config.thresholds,
            )
        });

        tracing::info!(
            %run_id,
            transactions = txs.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            potential_edges = links.len(),
            clusters = clusters.clusters.len(),
            high_risk_nodes = propagation.high_risk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            transactions_analyzed: txs.len(),
            malformed: outcome.malformed,
            scoring: outcome.report,
            alerts,
            graph,
            node_risks,
            potential_edges: links,
            clusters: clusters.clusters,
            cluster_method: Some(clusters.method),
            embedding_source: Some(embedding.source),
            summary,
        })
    }
}
