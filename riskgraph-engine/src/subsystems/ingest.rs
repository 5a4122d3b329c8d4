//! Ingest subsystem: narrows scored transactions before graph construction
//!
//! - Optional inclusive `[start, end]` time window
//! - Row-budget downsampling that keeps every high-risk row it can

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::index;
use riskgraph_core::config::SamplingConfig;
use riskgraph_core::models::Transaction;

pub fn filter_window(
    txs: Vec<Transaction>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Transaction> {
    if start.is_none() && end.is_none() {
        return txs;
    }
    let before = txs.len();
    let kept: Vec<Transaction> = txs
        .into_iter()
        .filter(|tx| start.map_or(true, |s| tx.timestamp >= s))
        .filter(|tx| end.map_or(true, |e| tx.timestamp <= e))
        .collect();
    tracing::info!(before, after = kept.len(), "Applied time window filter");
    kept
}

/// Downsample to `config.max_transactions` rows.
///
/// Rows at or above `high_risk` are kept first. If they alone exceed the
/// budget, the riskiest (then largest) are kept. Otherwise a share of the
/// remaining slots goes to rows at or above the suspicious floor, ranked by
/// risk then recency, and the rest is drawn uniformly from the remainder.
/// Retained rows keep their input order.
pub fn sample_transactions(
    txs: Vec<Transaction>,
    config: &SamplingConfig,
    high_risk: f64,
    rng: &mut StdRng,
) -> Vec<Transaction> {
    let budget = config.max_transactions;
    if txs.len() <= budget {
        return txs;
    }
    tracing::warn!(rows = txs.len(), budget, "Limiting analysis to the transaction budget");

    let (mut high, rest): (Vec<usize>, Vec<usize>) =
        (0..txs.len()).partition(|&i| txs[i].risk_score >= high_risk);
    let high_count = high.len();

    let mut keep = if high.len() > budget {
        high.sort_by(|&a, &b| {
            txs[b]
                .risk_score
                .total_cmp(&txs[a].risk_score)
                .then(txs[b].amount.total_cmp(&txs[a].amount))
        });
        high.truncate(budget);
        high
    } else {
        let slots = budget - high.len();
        let (mut suspicious, normal): (Vec<usize>, Vec<usize>) = rest
            .into_iter()
            .partition(|&i| txs[i].risk_score >= config.suspicious_floor);

        let suspicious_take =
            suspicious.len().min((slots as f64 * config.suspicious_share) as usize);
        suspicious.sort_by(|&a, &b| {
            txs[b]
                .risk_score
                .total_cmp(&txs[a].risk_score)
                .then(txs[b].timestamp.cmp(&txs[a].timestamp))
        });
        suspicious.truncate(suspicious_take);

        let normal_take = normal.len().min(slots - suspicious_take);
        let drawn = index::sample(rng, normal.len(), normal_take);

        let mut keep = high;
        keep.extend(suspicious);
        keep.extend(drawn.into_iter().map(|j| normal[j]));
        keep
    };

    keep.sort_unstable();
    tracing::info!(
        sampled = keep.len(),
        high_risk = high_count.min(budget),
        other = keep.len().saturating_sub(high_count.min(budget)),
        "Sampled transactions"
    );

    let mut slots: Vec<Option<Transaction>> = txs.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}

// ============================================================================
// TESTS
// ============================================================================
