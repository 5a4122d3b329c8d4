pub mod cluster;
pub mod graph;
pub mod summary;
pub mod transaction;

pub use cluster::{Cluster, ClusterMember, RiskLevel};
pub use graph::{is_merchant_id, Edge, Node, PotentialEdge};
pub use summary::{
    ClusterDigest, KeyAccount, OptimizationStats, SummarizedGraph, SummaryEdge, SummaryNode,
};
pub use transaction::{
    Alert, AlertLevel, MalformedRow, RiskType, Transaction, TransactionKind, TransactionRecord,
};
