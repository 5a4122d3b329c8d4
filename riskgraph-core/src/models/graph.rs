use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account seen as a transaction endpoint during one analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub transaction_count: usize,
    pub total_amount: f64,
    pub in_degree: usize,
    pub out_degree: usize,
    pub is_merchant: bool,
    pub risk_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
    pub last_transaction: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            transaction_count: 0,
            total_amount: 0.0,
            in_degree: 0,
            out_degree: 0,
            is_merchant: is_merchant_id(id),
            risk_score: 0.0,
            embedding: None,
            cluster_id: None,
            last_transaction: None,
        }
    }

    /// Visualization category: 0 for merchants, 1 for individuals.
    pub fn category(&self) -> u8 {
        if self.is_merchant {
            0
        } else {
            1
        }
    }

    pub fn account_type(&self) -> &'static str {
        if self.is_merchant {
            "merchant"
        } else {
            "individual"
        }
    }
}

/// Merchant accounts carry an `M` prefix in their identifier.
pub fn is_merchant_id(id: &str) -> bool {
    id.starts_with('M')
}

/// A directed edge. Observed edges come from transactions; potential edges
/// are proposed by link prediction and carry a similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub risk_score: f64,
    pub is_potential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl Edge {
    pub fn observed(source: &str, target: &str, weight: f64, risk_score: f64) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            weight,
            risk_score,
            is_potential: false,
            similarity: None,
        }
    }

    /// Ranking weight used when the edge list exceeds its budget.
    pub fn importance(&self) -> f64 {
        if self.is_potential {
            self.risk_score * 2.0
        } else {
            self.risk_score
        }
    }
}

/// A proposed, previously unobserved link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialEdge {
    pub source: String,
    pub target: String,
    pub similarity: f64,
    pub risk_score: f64,
}

impl From<&PotentialEdge> for Edge {
    fn from(p: &PotentialEdge) -> Self {
        Self {
            source: p.source.clone(),
            target: p.target.clone(),
            weight: 0.0,
            risk_score: p.risk_score,
            is_potential: true,
            similarity: Some(p.similarity),
        }
    }
}
