//! Linker subsystem: proposes unobserved "potential" edges
//!
//! - Embedding path: cosine similarity in row blocks, risk-filtered, top-k
//! - Structural path: second-degree neighbors scored by shared neighbors
//!
//! Similarity is never materialized as a full `n × n` matrix; each block
//! holds at most `block_size × n` values. Candidates are kept in a bounded
//! heap, so at most `max_candidates` survive any scan.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};

use ndarray::{s, Array2, ArrayView2, Axis};
use riskgraph_core::config::{LinkPredictionConfig, ThresholdConfig};
use riskgraph_core::models::PotentialEdge;
use riskgraph_core::TransactionGraph;

const ZERO_NORM: f32 = 1e-10;
const UNKNOWN_RISK: f64 = 0.5;

/// Candidate by node index, resolved to ids once ranked.
///
/// Ordered so that a greater candidate ranks earlier: risk, then similarity,
/// then lower source and target indices.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    source: usize,
    target: usize,
    similarity: f64,
    risk: f64,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.risk
            .total_cmp(&other.risk)
            .then(self.similarity.total_cmp(&other.similarity))
            .then(other.source.cmp(&self.source))
            .then(other.target.cmp(&self.target))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Best `limit` candidates seen so far; the weakest sits on top of the heap.
struct TopCandidates {
    limit: usize,
    heap: BinaryHeap<Reverse<Candidate>>,
    seen: usize,
}

impl TopCandidates {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(4096) + 1),
            seen: 0,
        }
    }

    fn offer(&mut self, candidate: Candidate) {
        self.seen += 1;
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(candidate));
            return;
        }
        let beats_weakest = self
            .heap
            .peek()
            .is_some_and(|Reverse(weakest)| candidate > *weakest);
        if beats_weakest {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    /// Kept candidates, best first.
    fn into_ranked(self) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked
    }
}

fn resolve(graph: &TransactionGraph, candidates: Vec<Candidate>) -> Vec<PotentialEdge> {
    let nodes = graph.nodes();
    candidates
        .into_iter()
        .map(|c| PotentialEdge {
            source: nodes[c.source].id.clone(),
            target: nodes[c.target].id.clone(),
            similarity: c.similarity,
            risk_score: c.risk,
        })
        .collect()
}

/// Rows scaled to unit length; zero rows stay zero.
fn l2_normalize(embeddings: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut normalized = embeddings.to_owned();
    for mut row in normalized.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        let norm = if norm == 0.0 { ZERO_NORM } else { norm };
        row.mapv_inplace(|v| v / norm);
    }
    normalized
}

/// Propose potential edges, ranked by `(risk, similarity)` descending.
///
/// `embeddings` rows follow node index order. When absent, or when its row
/// count disagrees with the graph, the structural method is used instead.
pub fn predict_links(
    graph: &TransactionGraph,
    embeddings: Option<ArrayView2<'_, f32>>,
    risks: &[f64],
    config: &LinkPredictionConfig,
    thresholds: &ThresholdConfig,
) -> Vec<PotentialEdge> {
    match embeddings {
        Some(embeddings) if embeddings.nrows() == graph.node_count() => {
            similarity_links(graph, embeddings, risks, config, thresholds)
        }
        _ => {
            tracing::warn!("No usable embeddings; predicting links from graph structure");
            structural_links(graph, risks, config)
        }
    }
}

fn similarity_links(
    graph: &TransactionGraph,
    embeddings: ArrayView2<'_, f32>,
    risks: &[f64],
    config: &LinkPredictionConfig,
    thresholds: &ThresholdConfig,
) -> Vec<PotentialEdge> {
    let n = embeddings.nrows();
    let normalized = l2_normalize(embeddings);
    let block_size = config.block_size.max(1);
    let risk_of = |i: usize| risks.get(i).copied().unwrap_or(UNKNOWN_RISK);

    let mut top = TopCandidates::new(config.max_candidates);
    for start in (0..n).step_by(block_size) {
        let end = (start + block_size).min(n);
        let block = normalized.slice(s![start..end, ..]).dot(&normalized.t());

        for (offset, row) in block.axis_iter(Axis(0)).enumerate() {
            let u = start + offset;
            for (v, &sim) in row.iter().enumerate() {
                let similarity = sim as f64;
                if u == v || similarity <= config.similarity_threshold {
                    continue;
                }
                if graph.has_edge_between(u, v) {
                    continue;
                }
                let risk = (risk_of(u) + risk_of(v)) / 2.0;
                if risk >= thresholds.suspicious {
                    top.offer(Candidate {
                        source: u,
                        target: v,
                        similarity,
                        risk,
                    });
                }
            }
        }
    }

    tracing::info!(
        nodes = n,
        candidates = top.seen,
        kept = top.len(),
        threshold = config.similarity_threshold,
        "Predicted links from embedding similarity"
    );
    resolve(graph, top.into_ranked())
}

fn structural_links(
    graph: &TransactionGraph,
    risks: &[f64],
    config: &LinkPredictionConfig,
) -> Vec<PotentialEdge> {
    let adjacency = graph.undirected_adjacency();
    let risk_of = |i: usize| risks.get(i).copied().unwrap_or(UNKNOWN_RISK);

    let mut top = TopCandidates::new(config.fallback_max_candidates);
    for (u, neighbors) in adjacency.iter().enumerate() {
        let second_degree: BTreeSet<usize> = neighbors
            .iter()
            .flat_map(|&w| adjacency[w].iter().copied())
            .filter(|&v| v != u && !neighbors.contains(&v))
            .collect();

        for v in second_degree {
            if graph.has_edge_between(u, v) {
                continue;
            }
            let common = neighbors.intersection(&adjacency[v]).count();
            let denom = neighbors.len().max(adjacency[v].len());
            let similarity = if denom == 0 {
                0.0
            } else {
                common as f64 / denom as f64
            };
            top.offer(Candidate {
                source: u,
                target: v,
                similarity,
                risk: (risk_of(u) + risk_of(v)) / 2.0,
            });
        }
    }

    tracing::info!(
        candidates = top.seen,
        kept = top.len(),
        "Predicted links from graph structure"
    );
    resolve(graph, top.into_ranked())
}

// ============================================================================
// TESTS
// ============================================================================
