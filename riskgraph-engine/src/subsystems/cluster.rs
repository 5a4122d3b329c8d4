//! Cluster subsystem: density-based risk clusters over node embeddings
//!
//! DBSCAN runs against a [`NeighborSource`]:
//! - [`OnTheFly`] measures distances per query, no `n × n` storage
//! - [`Precomputed`] fills a full distance matrix tile by tile on the rayon
//!   pool, used when accelerated execution is enabled
//!
//! Each point's neighborhood is queried once, when the expansion reaches it;
//! only labels and visit flags persist across queries.
//!
//! Noise points are dropped. When nothing clusters, a structural heuristic
//! groups high-risk seeds with randomly drawn risky peers.

use std::collections::VecDeque;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use riskgraph_core::config::ClusteringConfig;
use riskgraph_core::models::{Cluster, ClusterMember};
use riskgraph_core::TransactionGraph;
use serde::Serialize;

const SEED_RISK: f64 = 0.6;
const PEER_RISK: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    Density,
    DensityPrecomputed,
    Structural,
}

#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub clusters: Vec<Cluster>,
    /// Cluster id per node index; `None` for noise or unassigned nodes.
    pub assignments: Vec<Option<usize>>,
    pub method: ClusterMethod,
}

// ============================================================================
// Neighbor queries
// ============================================================================

pub trait NeighborSource {
    fn len(&self) -> usize;

    /// Indices within `eps` of point `i`, including `i` itself.
    fn neighbors(&self, i: usize) -> Vec<usize>;
}

fn euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

pub struct OnTheFly<'a> {
    embeddings: ArrayView2<'a, f32>,
    eps: f64,
}

impl<'a> OnTheFly<'a> {
    pub fn new(embeddings: ArrayView2<'a, f32>, eps: f64) -> Self {
        Self { embeddings, eps }
    }
}

impl NeighborSource for OnTheFly<'_> {
    fn len(&self) -> usize {
        self.embeddings.nrows()
    }

    fn neighbors(&self, i: usize) -> Vec<usize> {
        let point = self.embeddings.row(i);
        (0..self.len())
            .filter(|&j| euclidean(point, self.embeddings.row(j)) <= self.eps)
            .collect()
    }
}

pub struct Precomputed {
    distances: Array2<f64>,
    eps: f64,
}

impl Precomputed {
    /// Pairwise distances filled in `tile_size` row tiles, one rayon task per tile.
    pub fn build(embeddings: ArrayView2<'_, f32>, eps: f64, tile_size: usize) -> Self {
        let n = embeddings.nrows();
        let tile_size = tile_size.max(1);
        let mut distances = Array2::<f64>::zeros((n, n));
        distances
            .axis_chunks_iter_mut(Axis(0), tile_size)
            .into_par_iter()
            .enumerate()
            .for_each(|(tile, mut rows)| {
                let start = tile * tile_size;
                for (offset, mut row) in rows.outer_iter_mut().enumerate() {
                    let point = embeddings.row(start + offset);
                    for (j, d) in row.iter_mut().enumerate() {
                        *d = euclidean(point, embeddings.row(j));
                    }
                }
            });
        tracing::debug!(nodes = n, tile_size, "Built pairwise distance matrix");
        Self { distances, eps }
    }
}

impl NeighborSource for Precomputed {
    fn len(&self) -> usize {
        self.distances.nrows()
    }

    fn neighbors(&self, i: usize) -> Vec<usize> {
        self.distances
            .row(i)
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d <= self.eps)
            .map(|(j, _)| j)
            .collect()
    }
}

/// DBSCAN labels per point; `None` marks noise.
///
/// A point is core when its neighborhood, itself included, holds at least
/// `min_samples` points. Border points join the first cluster that reaches them.
pub fn dbscan(source: &impl NeighborSource, min_samples: usize) -> Vec<Option<usize>> {
    let n = source.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_id = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let neighborhood = source.neighbors(i);
        if neighborhood.len() < min_samples {
            continue;
        }
        let id = next_id;
        next_id += 1;
        labels[i] = Some(id);

        // Points are labelled when queued, so each enters the queue once.
        let mut queue = VecDeque::new();
        for k in neighborhood {
            if labels[k].is_none() {
                labels[k] = Some(id);
                queue.push_back(k);
            }
        }
        while let Some(j) = queue.pop_front() {
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let neighborhood = source.neighbors(j);
            if neighborhood.len() < min_samples {
                continue;
            }
            for k in neighborhood {
                if labels[k].is_none() {
                    labels[k] = Some(id);
                    queue.push_back(k);
                }
            }
        }
    }
    labels
}

// ============================================================================
// Detection
// ============================================================================

fn risk_of(risks: &[f64], i: usize) -> f64 {
    risks.get(i).copied().unwrap_or(0.0)
}

fn member(graph: &TransactionGraph, risks: &[f64], i: usize) -> ClusterMember {
    ClusterMember {
        node: graph.nodes()[i].id.clone(),
        risk_score: risk_of(risks, i),
    }
}

pub fn detect_clusters(
    graph: &TransactionGraph,
    embeddings: Option<ArrayView2<'_, f32>>,
    risks: &[f64],
    config: &ClusteringConfig,
    accelerated: bool,
    rng: &mut StdRng,
) -> ClusterResult {
    let n = graph.node_count();
    let embeddings = match embeddings {
        Some(e) if e.nrows() == n => e,
        _ => {
            tracing::warn!("No usable embeddings for clustering");
            return structural_clusters(graph, risks, config, rng);
        }
    };
    if n < config.min_samples {
        tracing::warn!(
            nodes = n,
            min_samples = config.min_samples,
            "Not enough nodes for density clustering"
        );
        return structural_clusters(graph, risks, config, rng);
    }

    let (labels, method) = if accelerated {
        let source = Precomputed::build(embeddings, config.eps, config.tile_size);
        (dbscan(&source, config.min_samples), ClusterMethod::DensityPrecomputed)
    } else {
        let source = OnTheFly::new(embeddings, config.eps);
        (dbscan(&source, config.min_samples), ClusterMethod::Density)
    };

    let cluster_count = labels.iter().flatten().max().map_or(0, |&m| m + 1);
    let mut grouped: Vec<Vec<ClusterMember>> = vec![Vec::new(); cluster_count];
    for (i, label) in labels.iter().enumerate() {
        if let Some(id) = label {
            grouped[*id].push(member(graph, risks, i));
        }
    }
    let clusters: Vec<Cluster> = grouped
        .into_iter()
        .enumerate()
        .map(|(id, members)| Cluster::from_members(id, members))
        .collect();

    if clusters.is_empty() {
        tracing::warn!(eps = config.eps, "Density clustering found no clusters");
        return structural_clusters(graph, risks, config, rng);
    }

    let noise = labels.iter().filter(|l| l.is_none()).count();
    tracing::info!(
        nodes = n,
        clusters = clusters.len(),
        noise,
        method = ?method,
        "Detected clusters"
    );
    ClusterResult {
        clusters,
        assignments: labels,
        method,
    }
}

/// Seeds are the first nodes above the seed risk, up to the configured limit.
/// Each seed draws unclaimed peers above the peer risk independently; nodes
/// already placed in a cluster are not drawn again.
fn structural_clusters(
    graph: &TransactionGraph,
    risks: &[f64],
    config: &ClusteringConfig,
    rng: &mut StdRng,
) -> ClusterResult {
    let n = graph.node_count();
    let p = config.fallback_inclusion_probability.clamp(0.0, 1.0);
    let mut assignments: Vec<Option<usize>> = vec![None; n];
    let mut clusters = Vec::new();

    let seeds: Vec<usize> = (0..n)
        .filter(|&i| risk_of(risks, i) > SEED_RISK)
        .take(config.fallback_seed_limit)
        .collect();

    for seed in seeds {
        if assignments[seed].is_some() {
            continue;
        }
        let peers: Vec<usize> = (0..n)
            .filter(|&j| j != seed && assignments[j].is_none() && risk_of(risks, j) > PEER_RISK)
            .filter(|_| rng.gen_bool(p))
            .collect();
        if peers.len() + 1 < config.min_samples {
            continue;
        }

        let id = clusters.len();
        let members: Vec<ClusterMember> = std::iter::once(seed)
            .chain(peers)
            .map(|i| {
                assignments[i] = Some(id);
                member(graph, risks, i)
            })
            .collect();
        clusters.push(Cluster::from_members(id, members));
    }

    tracing::info!(clusters = clusters.len(), "Built clusters from risk structure");
    ClusterResult {
        clusters,
        assignments,
        method: ClusterMethod::Structural,
    }
}

// ============================================================================
// TESTS
// ============================================================================
