//! Summarize subsystem: budget-bounded graph for downstream consumers
//!
//! - Edge budget by importance before anything else
//! - Focus set: nodes at or above the focus threshold plus two hops around them
//! - Low-risk nodes outside the focus set collapse into one node per category
//!   once the group is larger than the aggregation threshold
//! - Edges on focus nodes are kept verbatim; the rest are merged per endpoint pair
//! - Key accounts by PageRank and a digest of the riskier clusters
//!
//! Every step is deterministic: the same enriched graph always yields the same
//! summary.

use std::collections::{BTreeMap, HashMap, HashSet};

use riskgraph_core::config::{SummaryConfig, ThresholdConfig};
use riskgraph_core::models::{
    Cluster, ClusterDigest, Edge, KeyAccount, Node, OptimizationStats, SummarizedGraph,
    SummaryEdge, SummaryNode,
};
use riskgraph_core::TransactionGraph;

const AGGREGATE_SYMBOL_SIZE: f64 = 35.0;
const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_MAX_ITERATIONS: usize = 100;
const PAGERANK_TOLERANCE: f64 = 1e-6;

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn symbol_size(tx_count: usize) -> f64 {
    (20.0 + ((tx_count + 1) as f64).ln() * 5.0).min(50.0)
}

fn summary_node(node: &Node) -> SummaryNode {
    SummaryNode {
        id: node.id.clone(),
        name: node.id.clone(),
        value: node.total_amount,
        tx_count: node.transaction_count,
        category: node.category(),
        risk_score: round4(node.risk_score),
        symbol_size: symbol_size(node.transaction_count),
        cluster_id: node.cluster_id,
        is_aggregated: false,
        node_count: None,
    }
}

fn aggregate_node(category: u8, members: &[&Node]) -> SummaryNode {
    let label = if category == 0 { "Merchant group" } else { "Individual group" };
    let risk = members.iter().map(|n| n.risk_score).sum::<f64>() / members.len() as f64;
    SummaryNode {
        id: format!("agg_cat_{category}"),
        name: label.to_string(),
        value: members.iter().map(|n| n.total_amount).sum(),
        tx_count: members.iter().map(|n| n.transaction_count).sum(),
        category,
        risk_score: round4(risk),
        symbol_size: AGGREGATE_SYMBOL_SIZE,
        cluster_id: None,
        is_aggregated: true,
        node_count: Some(members.len()),
    }
}

/// Keep the `max_edges` most important edges; ties keep their original order.
pub fn budget_edges(edges: &[Edge], max_edges: usize) -> Vec<Edge> {
    if edges.len() <= max_edges {
        return edges.to_vec();
    }
    let mut ranked: Vec<&Edge> = edges.iter().collect();
    ranked.sort_by(|a, b| b.importance().total_cmp(&a.importance()));
    tracing::info!(edges = edges.len(), max_edges, "Trimming edges to budget");
    ranked.into_iter().take(max_edges).cloned().collect()
}

/// Focus nodes and the high-risk subset, both as node indices.
fn focus_set(
    nodes: &[Node],
    edges: &[Edge],
    index: &HashMap<&str, usize>,
    threshold: f64,
) -> (HashSet<usize>, HashSet<usize>) {
    let high: HashSet<usize> = (0..nodes.len())
        .filter(|&i| nodes[i].risk_score >= threshold)
        .collect();

    let endpoints: Vec<(usize, usize)> = edges
        .iter()
        .filter_map(|e| Some((*index.get(e.source.as_str())?, *index.get(e.target.as_str())?)))
        .collect();

    let hop = |from: &HashSet<usize>| -> HashSet<usize> {
        endpoints
            .iter()
            .flat_map(|&(s, t)| {
                let forward = from.contains(&s).then_some(t);
                let backward = from.contains(&t).then_some(s);
                forward.into_iter().chain(backward)
            })
            .collect()
    };

    let first = hop(&high);
    let second = hop(&first);

    let mut focus = high.clone();
    focus.extend(first);
    focus.extend(second);
    (focus, high)
}

/// Compress nodes and edges. Returns the summary with its statistics block.
pub fn summarize(
    nodes: &[Node],
    edges: &[Edge],
    config: &SummaryConfig,
) -> (Vec<SummaryNode>, Vec<SummaryEdge>, OptimizationStats) {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let (focus, high) = focus_set(nodes, edges, &index, config.focus_threshold);

    // Low-risk nodes grouped by category, kept in node order within a group.
    let mut groups: BTreeMap<u8, Vec<&Node>> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if !focus.contains(&i) {
            groups.entry(node.category()).or_default().push(node);
        }
    }

    // Emitted id for every node; aggregated members point at their group node.
    let mut representative: HashMap<&str, String> = HashMap::new();
    let mut out_nodes = Vec::new();
    for (category, members) in &groups {
        if members.len() > config.aggregation_threshold {
            let aggregate = aggregate_node(*category, members);
            for member in members {
                representative.insert(member.id.as_str(), aggregate.id.clone());
            }
            out_nodes.push(aggregate);
        } else {
            for member in members {
                representative.insert(member.id.as_str(), member.id.clone());
                out_nodes.push(summary_node(member));
            }
        }
    }
    for (i, node) in nodes.iter().enumerate() {
        if focus.contains(&i) {
            representative.insert(node.id.as_str(), node.id.clone());
            out_nodes.push(summary_node(node));
        }
    }

    let mut out_edges = Vec::new();
    let mut merged: Vec<SummaryEdge> = Vec::new();
    let mut merged_index: HashMap<(String, String), usize> = HashMap::new();
    for edge in edges {
        let (Some(&s), Some(&t)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) else {
            continue;
        };

        if high.contains(&s) || high.contains(&t) {
            out_edges.push(SummaryEdge {
                source: edge.source.clone(),
                target: edge.target.clone(),
                value: edge.weight,
                risk_score: round4(edge.risk_score),
                is_potential: edge.is_potential,
                transaction_count: None,
            });
            continue;
        }

        let (Some(source), Some(target)) = (
            representative.get(edge.source.as_str()),
            representative.get(edge.target.as_str()),
        ) else {
            continue;
        };
        // Flow inside one aggregate has no visible endpoint pair.
        if source == target && source != &edge.source {
            continue;
        }

        let key = (source.clone(), target.clone());
        match merged_index.get(&key) {
            Some(&m) => {
                let entry = &mut merged[m];
                entry.value += edge.weight;
                entry.risk_score = entry.risk_score.max(edge.risk_score);
                entry.is_potential &= edge.is_potential;
                entry.transaction_count = entry.transaction_count.map(|c| c + 1);
            }
            None => {
                merged_index.insert(key, merged.len());
                merged.push(SummaryEdge {
                    source: source.clone(),
                    target: target.clone(),
                    value: edge.weight,
                    risk_score: edge.risk_score,
                    is_potential: edge.is_potential,
                    transaction_count: Some(1),
                });
            }
        }
    }
    for mut edge in merged {
        edge.risk_score = round4(edge.risk_score);
        out_edges.push(edge);
    }

    let stats = OptimizationStats {
        original_node_count: nodes.len(),
        optimized_node_count: out_nodes.len(),
        original_edge_count: edges.len(),
        optimized_edge_count: out_edges.len(),
        high_risk_node_count: high.len(),
    };
    (out_nodes, out_edges, stats)
}

/// Most central accounts by weighted PageRank, only when some node is high-risk.
pub fn key_accounts(graph: &TransactionGraph, high_risk: f64, limit: usize) -> Vec<KeyAccount> {
    let nodes = graph.nodes();
    if !nodes.iter().any(|n| n.risk_score > high_risk) {
        return Vec::new();
    }

    let ranks = graph.pagerank(PAGERANK_DAMPING, PAGERANK_MAX_ITERATIONS, PAGERANK_TOLERANCE);
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by(|&a, &b| ranks[b].total_cmp(&ranks[a]).then(a.cmp(&b)));

    order
        .into_iter()
        .take(limit)
        .map(|i| {
            let node = &nodes[i];
            KeyAccount {
                account_id: node.id.clone(),
                pagerank: ranks[i],
                risk_score: round4(node.risk_score),
                total_amount: node.total_amount,
                account_type: node.account_type().to_string(),
                last_transaction: node.last_transaction,
            }
        })
        .collect()
}

pub fn cluster_digest(clusters: &[Cluster], config: &SummaryConfig) -> Vec<ClusterDigest> {
    clusters
        .iter()
        .filter(|c| c.avg_risk_score >= config.cluster_digest_min_risk)
        .map(|c| ClusterDigest {
            id: c.id,
            count: c.count,
            avg_risk_score: round4(c.avg_risk_score),
            risk_level: c.risk_level,
            members: c
                .members
                .iter()
                .take(config.cluster_digest_members)
                .cloned()
                .collect(),
        })
        .collect()
}

/// Summarize an enriched graph under the configured edge budget.
pub fn summarize_graph(
    graph: &TransactionGraph,
    clusters: &[Cluster],
    potential_edges_count: usize,
    config: &SummaryConfig,
    thresholds: &ThresholdConfig,
) -> SummarizedGraph {
    let edges = budget_edges(graph.edges(), config.max_edges);
    let (nodes, edges, mut stats) = summarize(graph.nodes(), &edges, config);
    stats.original_edge_count = graph.edge_count();

    tracing::info!(
        original_nodes = stats.original_node_count,
        optimized_nodes = stats.optimized_node_count,
        original_edges = stats.original_edge_count,
        optimized_edges = stats.optimized_edge_count,
        high_risk_nodes = stats.high_risk_node_count,
        "Summarized graph"
    );

    SummarizedGraph {
        paths: key_accounts(graph, thresholds.high_risk, config.max_paths),
        nodes,
        edges,
        clusters: cluster_digest(clusters, config),
        potential_edges_count,
        optimization_info: stats,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use riskgraph_core::models::ClusterMember;

    fn node(id: &str, risk: f64, tx: usize, amount: f64) -> Node {
        let mut n = Node::new(id);
        n.risk_score = risk;
        n.transaction_count = tx;
        n.total_amount = amount;
        n
    }

    fn edge(s: &str, t: &str, weight: f64, risk: f64) -> Edge {
        Edge::observed(s, t, weight, risk)
    }

    /// H is high-risk; A is one hop away, B two hops, C three hops.
    /// Ten low-risk individuals L0..L9 and two low-risk merchants M0, M1.
    fn fixture() -> (Vec<Node>, Vec<Edge>) {
        let mut nodes = vec![
            node("H", 0.91234567, 4, 1000.0),
            node("A", 0.2, 2, 100.0),
            node("B", 0.1, 2, 50.0),
            node("C", 0.1, 1, 20.0),
        ];
        for i in 0..10 {
            nodes.push(node(&format!("L{i}"), 0.1, 1, 10.0));
        }
        nodes.push(node("M0", 0.3, 3, 300.0));
        nodes.push(node("M1", 0.2, 1, 30.0));

        let mut edges = vec![
            edge("H", "A", 500.0, 0.812345),
            edge("A", "B", 40.0, 0.2),
            edge("B", "C", 20.0, 0.1),
            edge("L0", "L1", 5.0, 0.1),
            edge("L2", "L3", 7.0, 0.3),
            edge("L4", "M0", 9.0, 0.2),
            edge("C", "M1", 3.0, 0.4),
        ];
        edges.push(Edge::from(&riskgraph_core::models::PotentialEdge {
            source: "H".into(),
            target: "L9".into(),
            similarity: 0.9,
            risk_score: 0.6,
        }));
        (nodes, edges)
    }

    fn config() -> SummaryConfig {
        SummaryConfig::default()
    }

    // ========================================================================
    // TEST 1: Focus nodes survive unaggregated, the rest collapses by category
    // ========================================================================
    #[test]
    fn test_focus_and_aggregation() {
        let (nodes, edges) = fixture();
        let (out, _, stats) = summarize(&nodes, &edges, &config());

        let ids: Vec<&str> = out.iter().map(|n| n.id.as_str()).collect();
        // L9 is a neighbor of H through the potential edge
        for id in ["H", "A", "B", "L9"] {
            assert!(ids.contains(&id), "{id} missing");
        }
        // Nine low-risk individuals exceed the threshold of 5; C joins them
        let agg = out.iter().find(|n| n.id == "agg_cat_1").expect("aggregate");
        assert!(agg.is_aggregated);
        assert_eq!(agg.node_count, Some(10));
        assert_eq!(agg.symbol_size, 35.0);
        assert_eq!(agg.tx_count, 10);
        // Two merchants stay individual
        assert!(ids.contains(&"M0") && ids.contains(&"M1"));

        assert!(stats.optimized_node_count <= stats.original_node_count);
        assert_eq!(stats.high_risk_node_count, 1);
        let h = out.iter().find(|n| n.id == "H").unwrap();
        assert_eq!(h.risk_score, 0.9123);
        assert!(!h.is_aggregated);
    }

    // ========================================================================
    // TEST 2: High-risk edges verbatim, others merged with summed weight
    // ========================================================================
    #[test]
    fn test_edges_verbatim_and_merged() {
        let (nodes, edges) = fixture();
        let (_, out, _) = summarize(&nodes, &edges, &config());

        let ha = out.iter().find(|e| e.source == "H" && e.target == "A").unwrap();
        assert_eq!(ha.value, 500.0);
        assert_eq!(ha.risk_score, 0.8123);
        assert_eq!(ha.transaction_count, None);

        let potential = out.iter().find(|e| e.target == "L9").unwrap();
        assert!(potential.is_potential);

        // L0->L1 and L2->L3 collapse into one aggregate self-pair and are dropped;
        // C and L4 both sit in the individual aggregate
        let agg_m0 = out
            .iter()
            .find(|e| e.source == "agg_cat_1" && e.target == "M0")
            .unwrap();
        assert_eq!(agg_m0.value, 9.0);
        assert_eq!(agg_m0.transaction_count, Some(1));

        let agg_m1 = out
            .iter()
            .find(|e| e.source == "agg_cat_1" && e.target == "M1")
            .unwrap();
        assert_eq!(agg_m1.value, 3.0);

        let bc = out
            .iter()
            .find(|e| e.source == "B" && e.target == "agg_cat_1")
            .unwrap();
        assert_eq!(bc.value, 20.0);
        assert!(out.iter().all(|e| e.source != e.target));
    }

    #[test]
    fn test_merged_weight_is_sum_of_constituents() {
        // MF sits three hops from H, outside the focus set, in a one-merchant group
        let mut nodes: Vec<Node> = (0..8).map(|i| node(&format!("L{i}"), 0.1, 1, 1.0)).collect();
        nodes.push(node("H", 0.9, 1, 1.0));
        nodes.push(node("X", 0.2, 2, 1.0));
        nodes.push(node("Y", 0.2, 2, 1.0));
        nodes.push(node("MF", 0.3, 4, 1.0));
        let edges = vec![
            edge("H", "X", 1.0, 0.9),
            edge("X", "Y", 1.0, 0.2),
            edge("Y", "MF", 1.0, 0.2),
            edge("MF", "L0", 2.0, 0.1),
            edge("MF", "L1", 3.0, 0.5),
            edge("MF", "L2", 4.0, 0.2),
        ];

        let (_, out, _) = summarize(&nodes, &edges, &config());
        let merged = out
            .iter()
            .find(|e| e.source == "MF" && e.target == "agg_cat_1")
            .unwrap();
        assert_eq!(merged.value, 9.0);
        assert_eq!(merged.risk_score, 0.5);
        assert_eq!(merged.transaction_count, Some(3));
    }

    // ========================================================================
    // TEST 3: Small groups stay, idempotent output
    // ========================================================================
    #[test]
    fn test_small_groups_not_aggregated() {
        let nodes = vec![node("L0", 0.1, 1, 1.0), node("L1", 0.1, 1, 1.0)];
        let edges = vec![edge("L0", "L1", 5.0, 0.1)];

        let (out, out_edges, _) = summarize(&nodes, &edges, &config());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|n| !n.is_aggregated));
        assert_eq!(out_edges.len(), 1);
        assert_eq!(out_edges[0].transaction_count, Some(1));
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let (nodes, edges) = fixture();
        let first = summarize(&nodes, &edges, &config());
        let second = summarize(&nodes, &edges, &config());
        assert_eq!(first, second);
    }

    // ========================================================================
    // TEST 4: Edge budget and cluster digest
    // ========================================================================
    #[test]
    fn test_budget_keeps_most_important() {
        let mut edges = vec![
            edge("A", "B", 1.0, 0.2),
            edge("B", "C", 1.0, 0.9),
            edge("C", "D", 1.0, 0.5),
        ];
        edges.push(Edge::from(&riskgraph_core::models::PotentialEdge {
            source: "A".into(),
            target: "D".into(),
            similarity: 0.8,
            risk_score: 0.6,
        }));

        let kept = budget_edges(&edges, 2);
        assert_eq!(kept.len(), 2);
        // Potential edge importance is 1.2
        assert!(kept[0].is_potential);
        assert_eq!(kept[1].source, "B");
    }

    #[test]
    fn test_cluster_digest_filters_and_truncates() {
        let members = |risks: &[f64]| -> Vec<ClusterMember> {
            risks
                .iter()
                .enumerate()
                .map(|(i, &r)| ClusterMember {
                    node: format!("N{i}"),
                    risk_score: r,
                })
                .collect()
        };
        let clusters = vec![
            Cluster::from_members(0, members(&[0.9, 0.8, 0.7, 0.6])),
            Cluster::from_members(1, members(&[0.1, 0.2, 0.3])),
        ];

        let digest = cluster_digest(&clusters, &config());
        assert_eq!(digest.len(), 1);
        assert_eq!(digest[0].count, 4);
        assert_eq!(digest[0].members.len(), 3);
        assert_eq!(digest[0].avg_risk_score, 0.75);
    }

    #[test]
    fn test_symbol_size_capped() {
        assert_eq!(symbol_size(0), 20.0);
        assert_eq!(symbol_size(1_000_000), 50.0);
    }
}
