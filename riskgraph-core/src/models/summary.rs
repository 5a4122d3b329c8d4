use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cluster::{ClusterMember, RiskLevel};

/// Node in a budget-bounded graph handed to a visualization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryNode {
    pub id: String,
    pub name: String,
    /// Total transacted amount.
    pub value: f64,
    pub tx_count: usize,
    /// 0 merchant, 1 individual.
    pub category: u8,
    pub risk_score: f64,
    pub symbol_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
    #[serde(default)]
    pub is_aggregated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEdge {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub risk_score: f64,
    #[serde(default)]
    pub is_potential: bool,
    /// Set on edges merged from several originals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<usize>,
}

/// Highly central account, reported when the graph carries any high-risk node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAccount {
    pub account_id: String,
    pub pagerank: f64,
    pub risk_score: f64,
    pub total_amount: f64,
    pub account_type: String,
    pub last_transaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDigest {
    pub id: usize,
    pub count: usize,
    pub avg_risk_score: f64,
    pub risk_level: RiskLevel,
    pub members: Vec<ClusterMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub original_node_count: usize,
    pub optimized_node_count: usize,
    pub original_edge_count: usize,
    pub optimized_edge_count: usize,
    pub high_risk_node_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizedGraph {
    pub paths: Vec<KeyAccount>,
    pub nodes: Vec<SummaryNode>,
    pub edges: Vec<SummaryEdge>,
    pub clusters: Vec<ClusterDigest>,
    pub potential_edges_count: usize,
    pub optimization_info: OptimizationStats,
}
