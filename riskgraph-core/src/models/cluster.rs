use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Self::High
        } else if score > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub node: String,
    pub risk_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: usize,
    /// Sorted by risk, highest first.
    pub members: Vec<ClusterMember>,
    pub count: usize,
    pub avg_risk_score: f64,
    pub risk_level: RiskLevel,
}

impl Cluster {
    /// Build a cluster from unsorted members, deriving count, average and tier.
    pub fn from_members(id: usize, mut members: Vec<ClusterMember>) -> Self {
        members.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
        let count = members.len();
        let avg_risk_score = if count == 0 {
            0.0
        } else {
            members.iter().map(|m| m.risk_score).sum::<f64>() / count as f64
        };
        Self {
            id,
            members,
            count,
            avg_risk_score,
            risk_level: RiskLevel::from_score(avg_risk_score),
        }
    }
}
