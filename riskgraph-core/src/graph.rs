//! Directed transaction graph construction
//!
//! This module turns scored transactions into an account graph:
//! - One node per distinct endpoint, with transaction statistics
//! - One edge per (source, target) pair, last write wins for weight and risk
//! - Raw and z-score normalized node feature matrices
//! - Weighted PageRank for ranking key accounts

use std::collections::{BTreeSet, HashMap};

use ndarray::{Array2, Axis};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::models::{Edge, Node, PotentialEdge, Transaction};

/// Columns of the node feature matrix, in order.
pub const FEATURE_NAMES: [&str; 6] = [
    "transaction_count",
    "total_amount",
    "risk_score",
    "merchant_flag",
    "in_degree",
    "out_degree",
];

/// Number of node features.
pub const FEATURE_DIM: usize = FEATURE_NAMES.len();

/// Added to each feature's standard deviation before dividing.
const NORMALIZATION_EPS: f32 = 1e-5;

/// Node feature matrices, row `i` belonging to node index `i`.
#[derive(Debug, Clone)]
pub struct NodeFeatures {
    pub raw: Array2<f32>,
    pub normalized: Array2<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<(usize, usize), usize>,
    incident_risk: Vec<f64>,
}

impl TransactionGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order; a node's position is its index.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.nodes.get_mut(index)
    }

    /// Whether any edge, observed or potential, runs from `source` to `target`.
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        match (self.index_of(source), self.index_of(target)) {
            (Some(s), Some(t)) => self.edge_index.contains_key(&(s, t)),
            _ => false,
        }
    }

    pub fn has_edge_between(&self, source: usize, target: usize) -> bool {
        self.edge_index.contains_key(&(source, target))
    }

    /// Mean risk of the transactions touching node `index`.
    pub fn incident_risk(&self, index: usize) -> f64 {
        match self.nodes.get(index) {
            Some(node) if node.transaction_count > 0 => {
                self.incident_risk[index] / node.transaction_count as f64
            }
            _ => 0.0,
        }
    }

    /// Neighbor sets ignoring direction, built from every current edge.
    pub fn undirected_adjacency(&self) -> Vec<BTreeSet<usize>> {
        let mut adjacency = vec![BTreeSet::new(); self.nodes.len()];
        for &(s, t) in self.edge_index.keys() {
            if s != t {
                adjacency[s].insert(t);
                adjacency[t].insert(s);
            }
        }
        adjacency
    }

    /// Append a proposed edge. Observed edges are never replaced.
    pub fn add_potential_edge(&mut self, edge: &PotentialEdge) -> bool {
        let (Some(s), Some(t)) = (self.index_of(&edge.source), self.index_of(&edge.target)) else {
            return false;
        };
        if s == t || self.edge_index.contains_key(&(s, t)) {
            return false;
        }
        self.edge_index.insert((s, t), self.edges.len());
        self.edges.push(Edge::from(edge));
        true
    }

    /// Raw feature matrix `[n, FEATURE_DIM]`.
    pub fn raw_features(&self) -> Array2<f32> {
        let mut raw = Array2::<f32>::zeros((self.nodes.len(), FEATURE_DIM));
        for (mut row, node) in raw.axis_iter_mut(Axis(0)).zip(&self.nodes) {
            row[0] = node.transaction_count as f32;
            row[1] = node.total_amount as f32;
            row[2] = node.risk_score as f32;
            row[3] = if node.is_merchant { 1.0 } else { 0.0 };
            row[4] = node.in_degree as f32;
            row[5] = node.out_degree as f32;
        }
        raw
    }

    pub fn features(&self) -> NodeFeatures {
        let raw = self.raw_features();
        let normalized = zscore(&raw);
        NodeFeatures { raw, normalized }
    }

    /// Weighted PageRank over observed edges, weights being transaction amounts.
    ///
    /// Nodes without outgoing weight spread their rank uniformly.
    pub fn pagerank(&self, damping: f64, max_iterations: usize, tolerance: f64) -> Vec<f64> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }

        let mut out_weight = vec![0.0f64; n];
        let mut incoming: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        // Edge order, not hash order, so sums are reproducible.
        for edge in &self.edges {
            if edge.is_potential || edge.weight <= 0.0 {
                continue;
            }
            let (Some(s), Some(t)) = (self.index_of(&edge.source), self.index_of(&edge.target))
            else {
                continue;
            };
            out_weight[s] += edge.weight;
            incoming[t].push((s, edge.weight));
        }

        let teleport = (1.0 - damping) / n as f64;
        let mut scores = vec![1.0 / n as f64; n];
        let mut next = vec![0.0f64; n];

        for _ in 0..max_iterations {
            let dangling: f64 = (0..n)
                .filter(|&i| out_weight[i] == 0.0)
                .map(|i| scores[i])
                .sum();
            let dangling_share = damping * dangling / n as f64;

            let mut diff = 0.0;
            for i in 0..n {
                let rank_sum: f64 = incoming[i]
                    .iter()
                    .map(|&(s, w)| scores[s] * w / out_weight[s])
                    .sum();
                next[i] = teleport + dangling_share + damping * rank_sum;
                diff += (next[i] - scores[i]).abs();
            }
            std::mem::swap(&mut scores, &mut next);

            if diff < n as f64 * tolerance {
                break;
            }
        }
        scores
    }

    fn ensure_node(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(Node::new(id));
        self.index.insert(id.to_string(), i);
        self.incident_risk.push(0.0);
        i
    }

    fn record_transaction(&mut self, tx: &Transaction) {
        let s = self.ensure_node(&tx.source);
        let t = self.ensure_node(&tx.destination);

        // A self-transfer counts once for its account.
        for i in std::iter::once(s).chain((s != t).then_some(t)) {
            let node = &mut self.nodes[i];
            node.transaction_count += 1;
            node.total_amount += tx.amount;
            node.last_transaction = node.last_transaction.max(Some(tx.timestamp));
            self.incident_risk[i] += tx.risk_score;
            node.risk_score = self.incident_risk[i] / node.transaction_count as f64;
        }

        match self.edge_index.get(&(s, t)) {
            Some(&e) => {
                let edge = &mut self.edges[e];
                edge.weight = tx.amount;
                edge.risk_score = tx.risk_score;
                if edge.is_potential {
                    // A proposed link is now observed.
                    edge.is_potential = false;
                    edge.similarity = None;
                    self.nodes[s].out_degree += 1;
                    self.nodes[t].in_degree += 1;
                }
            }
            None => {
                self.edge_index.insert((s, t), self.edges.len());
                self.edges.push(Edge::observed(
                    &tx.source,
                    &tx.destination,
                    tx.amount,
                    tx.risk_score,
                ));
                self.nodes[s].out_degree += 1;
                self.nodes[t].in_degree += 1;
            }
        }
    }
}

/// Serialized as its node and edge lists only.
impl Serialize for TransactionGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TransactionGraph", 2)?;
        state.serialize_field("nodes", &self.nodes)?;
        state.serialize_field("edges", &self.edges)?;
        state.end()
    }
}

/// Per-column z-score using the sample standard deviation plus a small epsilon.
///
/// With fewer than two rows the deviation is taken as zero.
pub fn zscore(raw: &Array2<f32>) -> Array2<f32> {
    let n = raw.nrows();
    if n == 0 {
        return raw.clone();
    }
    let mut normalized = raw.clone();
    for mut column in normalized.axis_iter_mut(Axis(1)) {
        let mean = column.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let std = if n < 2 {
            0.0
        } else {
            let var = column
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / (n - 1) as f64;
            var.sqrt()
        };
        let denom = std as f32 + NORMALIZATION_EPS;
        column.mapv_inplace(|v| (v - mean as f32) / denom);
    }
    normalized
}

/// Accumulates transactions into a [`TransactionGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: TransactionGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a previously built graph; node statistics keep accumulating.
    pub fn extend(previous: TransactionGraph) -> Self {
        Self { graph: previous }
    }

    pub fn add(&mut self, tx: &Transaction) -> &mut Self {
        self.graph.record_transaction(tx);
        self
    }

    pub fn add_all<'a>(&mut self, txs: impl IntoIterator<Item = &'a Transaction>) -> &mut Self {
        for tx in txs {
            self.graph.record_transaction(tx);
        }
        self
    }

    pub fn build(self) -> TransactionGraph {
        tracing::info!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "Built transaction graph"
        );
        self.graph
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskType, TransactionKind};
    use chrono::{TimeZone, Utc};

    fn make_tx(source: &str, target: &str, amount: f64, risk: f64) -> Transaction {
        Transaction {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            kind: TransactionKind::Transfer,
            amount,
            source: source.to_string(),
            destination: target.to_string(),
            oldbalance_org: 0.0,
            newbalance_orig: 0.0,
            oldbalance_dest: 0.0,
            newbalance_dest: 0.0,
            is_fraud: None,
            risk_score: risk,
            risk_type: RiskType::Normal,
        }
    }

    fn build(txs: &[Transaction]) -> TransactionGraph {
        let mut builder = GraphBuilder::new();
        builder.add_all(txs);
        builder.build()
    }

    // ========================================================================
    // TEST 1: Duplicate pairs keep one edge carrying the last transaction
    // ========================================================================
    #[test]
    fn test_duplicate_pair_last_write_wins() {
        let graph = build(&[make_tx("A", "B", 100.0, 0.2), make_tx("A", "B", 50.0, 0.6)]);

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges()[0].weight, 50.0);
        assert_eq!(graph.edges()[0].risk_score, 0.6);

        let a = graph.node("A").unwrap();
        assert_eq!(a.transaction_count, 2);
        assert_eq!(a.total_amount, 150.0);
        assert_eq!(a.out_degree, 1);
        assert!((a.risk_score - 0.4).abs() < 1e-12);
    }

    // ========================================================================
    // TEST 2: Node set equals distinct endpoints
    // ========================================================================
    #[test]
    fn test_nodes_are_distinct_endpoints() {
        let graph = build(&[
            make_tx("A", "B", 1.0, 0.0),
            make_tx("B", "C", 1.0, 0.0),
            make_tx("C", "A", 1.0, 0.0),
            make_tx("M1", "A", 1.0, 0.0),
        ]);

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.index_of("A"), Some(0));
        assert_eq!(graph.index_of("M1"), Some(3));
        assert!(graph.node("M1").unwrap().is_merchant);
        assert_eq!(graph.node("A").unwrap().in_degree, 2);
    }

    // ========================================================================
    // TEST 3: Feature matrix layout and normalization
    // ========================================================================
    #[test]
    fn test_raw_feature_columns() {
        let graph = build(&[make_tx("A", "M1", 10.0, 0.5), make_tx("A", "B", 30.0, 0.1)]);
        let raw = graph.raw_features();

        assert_eq!(raw.shape(), &[3, FEATURE_DIM]);
        // A: 2 txs, 40 total, mean risk 0.3, individual, in 0, out 2
        assert_eq!(raw[[0, 0]], 2.0);
        assert_eq!(raw[[0, 1]], 40.0);
        assert!((raw[[0, 2]] - 0.3).abs() < 1e-6);
        assert_eq!(raw[[0, 3]], 0.0);
        assert_eq!(raw[[0, 5]], 2.0);
        // M1 is a merchant with one incoming edge
        assert_eq!(raw[[1, 3]], 1.0);
        assert_eq!(raw[[1, 4]], 1.0);
    }

    #[test]
    fn test_zscore_centers_columns() {
        let raw = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let z = zscore(&raw);

        // Column 0: mean 2, sample std 1
        assert!((z[[0, 0]] + 1.0).abs() < 1e-3);
        assert!(z[[1, 0]].abs() < 1e-6);
        assert!((z[[2, 0]] - 1.0).abs() < 1e-3);
        // Constant column maps to zero without dividing by zero
        assert!(z.column(1).iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_zscore_single_row_is_finite() {
        let raw = Array2::from_shape_vec((1, 2), vec![7.0, 3.0]).unwrap();
        let z = zscore(&raw);
        assert!(z.iter().all(|v| v.is_finite() && v.abs() < 1e-6));
    }

    // ========================================================================
    // TEST 4: Potential edges never replace observed ones
    // ========================================================================
    #[test]
    fn test_potential_edge_does_not_replace_observed() {
        let mut graph = build(&[make_tx("A", "B", 10.0, 0.3), make_tx("B", "C", 10.0, 0.3)]);

        let dup = PotentialEdge {
            source: "A".into(),
            target: "B".into(),
            similarity: 0.9,
            risk_score: 0.9,
        };
        let fresh = PotentialEdge {
            source: "A".into(),
            target: "C".into(),
            similarity: 0.8,
            risk_score: 0.7,
        };

        assert!(!graph.add_potential_edge(&dup));
        assert!(graph.add_potential_edge(&fresh));
        assert_eq!(graph.edge_count(), 3);
        assert!(!graph.edges()[0].is_potential);
        assert_eq!(graph.edges()[0].risk_score, 0.3);
        assert!(graph.has_edge("A", "C"));
    }

    // ========================================================================
    // TEST 5: Extending a previous graph accumulates statistics
    // ========================================================================
    #[test]
    fn test_extend_previous_graph() {
        let first = build(&[make_tx("A", "B", 10.0, 0.2)]);
        let mut builder = GraphBuilder::extend(first);
        builder.add(&make_tx("A", "C", 20.0, 0.4));
        let graph = builder.build();

        assert_eq!(graph.node_count(), 3);
        let a = graph.node("A").unwrap();
        assert_eq!(a.transaction_count, 2);
        assert_eq!(a.total_amount, 30.0);
        assert_eq!(a.out_degree, 2);
    }

    #[test]
    fn test_observed_transaction_promotes_potential_edge() {
        let mut graph = build(&[make_tx("A", "B", 10.0, 0.3), make_tx("B", "C", 10.0, 0.3)]);
        graph.add_potential_edge(&PotentialEdge {
            source: "A".into(),
            target: "C".into(),
            similarity: 0.8,
            risk_score: 0.7,
        });

        let mut builder = GraphBuilder::extend(graph);
        builder.add(&make_tx("A", "C", 40.0, 0.5));
        let graph = builder.build();

        let edge = &graph.edges()[2];
        assert!(!edge.is_potential);
        assert_eq!(edge.weight, 40.0);
        assert_eq!(graph.node("A").unwrap().out_degree, 2);
        assert_eq!(graph.node("C").unwrap().in_degree, 2);
    }

    // ========================================================================
    // TEST 6: PageRank favours heavily funded sinks
    // ========================================================================
    #[test]
    fn test_pagerank_ranks_hub_first() {
        let graph = build(&[
            make_tx("A", "HUB", 100.0, 0.0),
            make_tx("B", "HUB", 100.0, 0.0),
            make_tx("C", "HUB", 100.0, 0.0),
            make_tx("A", "B", 1.0, 0.0),
        ]);

        let ranks = graph.pagerank(0.85, 100, 1e-8);
        let hub = graph.index_of("HUB").unwrap();

        assert!((ranks.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        for (i, r) in ranks.iter().enumerate() {
            if i != hub {
                assert!(ranks[hub] > *r);
            }
        }
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new().build();
        assert!(graph.is_empty());
        assert!(graph.pagerank(0.85, 100, 1e-6).is_empty());
        assert_eq!(graph.features().raw.nrows(), 0);
    }

    #[test]
    fn test_serializes_nodes_and_edges() {
        let graph = build(&[make_tx("A", "B", 10.0, 0.3)]);
        let json = serde_json::to_value(&graph).unwrap();

        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(json["edges"][0]["source"], "A");
        assert!(json.get("edge_index").is_none());
    }
}
