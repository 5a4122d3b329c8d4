//! Multi-factor transaction risk scoring
//!
//! Each transaction receives four independent contributions:
//! - **Amount**: additive tiers above 100k / 500k / 1M
//! - **Balance**: balances inconsistent with the amount, or a drained origin
//! - **Frequency**: trailing 24h activity of the sender and receiver accounts
//! - **Pattern**: reversal cycles and pass-through chains
//!
//! The sum is combined with the fraud label, lifted by floor overrides for
//! composite high-risk conditions, then jittered by a [`NoiseSource`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, ThresholdConfig};
use crate::error::EngineError;
use crate::models::{
    Alert, AlertLevel, MalformedRow, RiskType, Transaction, TransactionKind, TransactionRecord,
};

/// Trailing window for frequency statistics, in seconds.
const FREQUENCY_WINDOW_SECS: i64 = 24 * 3600;

/// Window in which an inbound transfer must be forwarded to count as pass-through.
const PASS_THROUGH_WINDOW_SECS: i64 = 3600;

/// Bucket width for reversal-cycle matching, in seconds.
const CYCLE_BUCKET_SECS: i64 = 3600;

/// Upper bounds of the reported risk distribution ranges; each range is open below.
const DISTRIBUTION_RANGES: [(f64, f64); 5] =
    [(0.0, 0.3), (0.3, 0.5), (0.5, 0.7), (0.7, 0.85), (0.85, 1.0)];

// ============================================================================
// Noise sources
// ============================================================================

/// Source of the anti-clustering perturbation added to every final score.
pub trait NoiseSource: Send {
    fn next_jitter(&mut self) -> f64;
}

/// Seeded Gaussian jitter, truncated at three standard deviations.
#[derive(Debug)]
pub struct GaussianNoise {
    rng: StdRng,
    normal: Option<Normal<f64>>,
    bound: f64,
}

impl GaussianNoise {
    pub fn new(sigma: f64, seed: Option<u64>) -> Result<Self, EngineError> {
        let normal = if sigma > 0.0 {
            Some(Normal::new(0.0, sigma).map_err(|e| {
                EngineError::InvalidConfig(format!("invalid jitter sigma {sigma}: {e}"))
            })?)
        } else {
            None
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            normal,
            bound: 3.0 * sigma.max(0.0),
        })
    }
}

impl NoiseSource for GaussianNoise {
    fn next_jitter(&mut self) -> f64 {
        match &self.normal {
            Some(normal) => normal.sample(&mut self.rng).clamp(-self.bound, self.bound),
            None => 0.0,
        }
    }
}

/// Fixed jitter, used to make scoring fully deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantNoise(pub f64);

impl NoiseSource for ConstantNoise {
    fn next_jitter(&mut self) -> f64 {
        self.0
    }
}

// ============================================================================
// Report types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorStats {
    pub mean: f64,
    pub max: f64,
    /// Rows whose contribution exceeds the factor's elevation cut.
    pub elevated: usize,
}

impl FactorStats {
    fn from_values(values: impl Iterator<Item = f64>, cut: f64) -> Self {
        let (count, sum, max, elevated) =
            values.fold((0usize, 0.0, 0.0f64, 0usize), |(n, s, m, e), v| {
                (n + 1, s + v, m.max(v), e + usize::from(v > cut))
            });
        Self {
            mean: if count == 0 { 0.0 } else { sum / count as f64 },
            max,
            elevated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBucket {
    pub low: f64,
    pub high: f64,
    pub count: usize,
    pub percent: f64,
}

/// Per-factor statistics of one scoring pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringReport {
    pub scored: usize,
    pub malformed: usize,
    pub amount: FactorStats,
    pub balance: FactorStats,
    pub frequency: FactorStats,
    pub pattern: FactorStats,
    pub final_score: FactorStats,
    pub distribution: Vec<RiskBucket>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringOutcome {
    /// Scored rows in input order, malformed rows excluded.
    pub transactions: Vec<Transaction>,
    pub malformed: Vec<MalformedRow>,
    pub report: ScoringReport,
}

// ============================================================================
// Factor computation (pure)
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RiskFactors {
    amount: f64,
    balance: f64,
    frequency: f64,
    pattern: f64,
    drained: bool,
}

/// Additive amount tiers.
pub fn amount_risk(amount: f64) -> f64 {
    [(1_000_000.0, 0.3), (500_000.0, 0.2), (100_000.0, 0.1)]
        .iter()
        .filter(|(threshold, _)| amount > *threshold)
        .map(|(_, score)| score)
        .sum()
}

/// Balance contribution and whether the origin account was drained.
fn balance_risk(tx: &Transaction) -> (f64, bool) {
    let tolerance = tx.amount * 0.01;
    let orig_delta = tx.newbalance_orig - tx.oldbalance_org;
    let dest_delta = tx.newbalance_dest - tx.oldbalance_dest;

    let mut risk = 0.0;
    if (orig_delta + tx.amount).abs() > tolerance || (dest_delta - tx.amount).abs() > tolerance {
        risk += 0.2;
    }
    let drained = tx.newbalance_orig < tolerance && tx.oldbalance_org > 10_000.0;
    if drained {
        risk += 0.3;
    }
    (risk, drained)
}

/// Frequency contribution from combined sender + receiver 24h activity.
pub fn frequency_risk(count: usize, amount: f64) -> f64 {
    let mut risk = if count > 20 {
        0.3
    } else if count > 10 {
        0.2
    } else if count > 5 {
        0.1
    } else {
        0.0
    };
    if amount > 1_000_000.0 {
        risk += 0.2;
    } else if amount > 500_000.0 {
        risk += 0.1;
    }
    risk
}

/// Timestamps and running amount totals for one account role, sorted by time.
struct ActivityIndex {
    times: Vec<i64>,
    prefix: Vec<f64>,
}

impl ActivityIndex {
    fn build(mut entries: Vec<(i64, f64)>) -> Self {
        entries.sort_by_key(|(t, _)| *t);
        let mut prefix = Vec::with_capacity(entries.len() + 1);
        prefix.push(0.0);
        let mut running = 0.0;
        for (_, amount) in &entries {
            running += amount;
            prefix.push(running);
        }
        Self {
            times: entries.into_iter().map(|(t, _)| t).collect(),
            prefix,
        }
    }

    /// Count and summed amount within `[t - window, t)`.
    fn window(&self, t: i64) -> (usize, f64) {
        let lo = self.times.partition_point(|&x| x < t - FREQUENCY_WINDOW_SECS);
        let hi = self.times.partition_point(|&x| x < t);
        (hi - lo, self.prefix[hi] - self.prefix[lo])
    }
}

fn index_by<'a>(
    txs: &'a [Transaction],
    key: impl Fn(&'a Transaction) -> &'a str,
) -> HashMap<&'a str, ActivityIndex> {
    let mut grouped: HashMap<&str, Vec<(i64, f64)>> = HashMap::new();
    for tx in txs {
        grouped
            .entry(key(tx))
            .or_default()
            .push((tx.timestamp.timestamp(), tx.amount));
    }
    grouped
        .into_iter()
        .map(|(k, v)| (k, ActivityIndex::build(v)))
        .collect()
}

fn frequency_factors(txs: &[Transaction]) -> Vec<f64> {
    let as_sender = index_by(txs, |tx| tx.source.as_str());
    let as_receiver = index_by(txs, |tx| tx.destination.as_str());

    txs.iter()
        .map(|tx| {
            let t = tx.timestamp.timestamp();
            let (sent, sent_amount) = as_sender
                .get(tx.source.as_str())
                .map_or((0, 0.0), |idx| idx.window(t));
            let (received, received_amount) = as_receiver
                .get(tx.destination.as_str())
                .map_or((0, 0.0), |idx| idx.window(t));
            frequency_risk(sent + received, sent_amount + received_amount)
        })
        .collect()
}

fn pattern_factors(txs: &[Transaction]) -> Vec<f64> {
    let mut pattern = vec![0.0f64; txs.len()];

    // Reversal cycles: A->B and B->A in the same bucket with near-equal amounts.
    let mut by_pair: HashMap<(&str, &str, i64), Vec<usize>> = HashMap::new();
    for (i, tx) in txs.iter().enumerate() {
        let bucket = tx.timestamp.timestamp().div_euclid(CYCLE_BUCKET_SECS);
        by_pair
            .entry((tx.source.as_str(), tx.destination.as_str(), bucket))
            .or_default()
            .push(i);
    }
    for (i, tx) in txs.iter().enumerate() {
        let bucket = tx.timestamp.timestamp().div_euclid(CYCLE_BUCKET_SECS);
        let reversed = by_pair.get(&(tx.destination.as_str(), tx.source.as_str(), bucket));
        let is_cycle = reversed.is_some_and(|rows| {
            rows.iter()
                .any(|&j| j != i && (tx.amount - txs[j].amount).abs() < tx.amount * 0.01)
        });
        if is_cycle {
            pattern[i] = 0.3;
        }
    }

    // Pass-through: a transfer into B forwarded by B within the hour.
    let mut outbound: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, tx) in txs.iter().enumerate() {
        outbound.entry(tx.source.as_str()).or_default().push(i);
    }
    for rows in outbound.values_mut() {
        rows.sort_by_key(|&i| txs[i].timestamp);
    }
    for (i, inbound) in txs.iter().enumerate() {
        if !inbound.kind.is_outbound_transfer() {
            continue;
        }
        let Some(rows) = outbound.get(inbound.destination.as_str()) else {
            continue;
        };
        let start = inbound.timestamp.timestamp();
        let from = rows.partition_point(|&j| txs[j].timestamp.timestamp() < start);
        for &j in &rows[from..] {
            if txs[j].timestamp.timestamp() > start + PASS_THROUGH_WINDOW_SECS {
                break;
            }
            if j != i && txs[j].amount >= inbound.amount * 0.9 {
                pattern[i] = pattern[i].max(0.25);
                pattern[j] = pattern[j].max(0.25);
            }
        }
    }

    pattern
}

fn factor_table(txs: &[Transaction]) -> Vec<RiskFactors> {
    let frequency = frequency_factors(txs);
    let pattern = pattern_factors(txs);
    txs.iter()
        .zip(frequency)
        .zip(pattern)
        .map(|((tx, frequency), pattern)| {
            let (balance, drained) = balance_risk(tx);
            RiskFactors {
                amount: amount_risk(tx.amount),
                balance,
                frequency,
                pattern,
                drained,
            }
        })
        .collect()
}

/// Score before jitter: summed factors, fraud label, clip, floor overrides.
fn base_score(tx: &Transaction, f: &RiskFactors) -> f64 {
    let mut score = f.amount + f.balance + f.frequency + f.pattern;
    if tx.is_fraud == Some(true) {
        score = score.max(1.0);
    }
    score = score.clamp(0.0, 1.0);

    let floors = [
        (tx.kind == TransactionKind::CashOut && tx.amount > 1_000_000.0, 0.8),
        (f.frequency > 0.2 && tx.amount > 500_000.0, 0.75),
        (f.pattern > 0.2 && tx.amount > 300_000.0, 0.85),
        (f.drained && tx.amount > 100_000.0, 0.9),
    ];
    for (condition, floor) in floors {
        if condition {
            score = score.max(floor);
        }
    }
    score
}

pub fn classify_risk(score: f64, amount: f64, thresholds: &ThresholdConfig) -> RiskType {
    if score > thresholds.very_high_risk {
        if amount > 500_000.0 {
            RiskType::LargeTransaction
        } else {
            RiskType::IdentityTheft
        }
    } else if score > thresholds.high_risk {
        RiskType::MoneyLaundering
    } else if score > thresholds.suspicious {
        RiskType::Suspicious
    } else {
        RiskType::Normal
    }
}

// ============================================================================
// RiskScorer
// ============================================================================

pub struct RiskScorer<N: NoiseSource = GaussianNoise> {
    thresholds: ThresholdConfig,
    noise: N,
    step_origin: DateTime<Utc>,
}

impl RiskScorer<GaussianNoise> {
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let noise = GaussianNoise::new(config.scoring.jitter_sigma, config.scoring.seed)?;
        Ok(Self::new(config.thresholds.clone(), noise))
    }
}

impl<N: NoiseSource> RiskScorer<N> {
    pub fn new(thresholds: ThresholdConfig, noise: N) -> Self {
        Self {
            thresholds,
            noise,
            step_origin: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Origin that hour-offset (`step`) records are resolved against.
    pub fn with_step_origin(mut self, origin: DateTime<Utc>) -> Self {
        self.step_origin = origin;
        self
    }

    /// Score a batch. Malformed rows are reported and skipped, never fatal.
    pub fn score(&mut self, records: &[TransactionRecord]) -> ScoringOutcome {
        let mut transactions = Vec::with_capacity(records.len());
        let mut malformed = Vec::new();

        for (index, record) in records.iter().enumerate() {
            match self.validate(record) {
                Ok(tx) => transactions.push(tx),
                Err(reason) => {
                    tracing::warn!(index, reason = %reason, "Skipping malformed transaction row");
                    malformed.push(MalformedRow { index, reason });
                }
            }
        }

        let factors = factor_table(&transactions);
        for (tx, f) in transactions.iter_mut().zip(&factors) {
            let jittered = base_score(tx, f) + self.noise.next_jitter();
            tx.risk_score = jittered.clamp(0.0, 1.0);
            tx.risk_type = classify_risk(tx.risk_score, tx.amount, &self.thresholds);
        }

        let report = build_report(&transactions, &factors, malformed.len(), &self.thresholds);
        log_report(&report);

        ScoringOutcome {
            transactions,
            malformed,
            report,
        }
    }

    fn validate(&self, record: &TransactionRecord) -> Result<Transaction, String> {
        let timestamp = match (record.timestamp, record.step) {
            (Some(ts), _) => ts,
            (None, Some(step)) => Duration::try_hours(step)
                .and_then(|d| self.step_origin.checked_add_signed(d))
                .ok_or_else(|| format!("step {step} out of range"))?,
            (None, None) => return Err("missing timestamp".to_string()),
        };
        let kind = record
            .kind
            .as_deref()
            .map(TransactionKind::parse)
            .ok_or("missing type")?;
        let amount = record.amount.ok_or("missing amount")?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("invalid amount {amount}"));
        }
        let source = non_empty(&record.name_orig).ok_or("missing origin account")?;
        let destination = non_empty(&record.name_dest).ok_or("missing destination account")?;

        Ok(Transaction {
            timestamp,
            kind,
            amount,
            source,
            destination,
            oldbalance_org: record.oldbalance_org.unwrap_or(0.0),
            newbalance_orig: record.newbalance_orig.unwrap_or(0.0),
            oldbalance_dest: record.oldbalance_dest.unwrap_or(0.0),
            newbalance_dest: record.newbalance_dest.unwrap_or(0.0),
            is_fraud: record.is_fraud,
            risk_score: 0.0,
            risk_type: RiskType::Normal,
        })
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn build_report(
    txs: &[Transaction],
    factors: &[RiskFactors],
    malformed: usize,
    thresholds: &ThresholdConfig,
) -> ScoringReport {
    let total = txs.len();
    let distribution = DISTRIBUTION_RANGES
        .iter()
        .map(|&(low, high)| {
            let count = txs
                .iter()
                .filter(|tx| tx.risk_score > low && tx.risk_score <= high)
                .count();
            RiskBucket {
                low,
                high,
                count,
                percent: if total == 0 {
                    0.0
                } else {
                    count as f64 * 100.0 / total as f64
                },
            }
        })
        .collect();

    ScoringReport {
        scored: total,
        malformed,
        amount: FactorStats::from_values(factors.iter().map(|f| f.amount), 0.3),
        balance: FactorStats::from_values(factors.iter().map(|f| f.balance), 0.3),
        frequency: FactorStats::from_values(factors.iter().map(|f| f.frequency), 0.3),
        pattern: FactorStats::from_values(factors.iter().map(|f| f.pattern), 0.3),
        final_score: FactorStats::from_values(
            txs.iter().map(|tx| tx.risk_score),
            thresholds.high_risk,
        ),
        distribution,
    }
}

fn log_report(report: &ScoringReport) {
    for (factor, stats) in [
        ("amount", &report.amount),
        ("balance", &report.balance),
        ("frequency", &report.frequency),
        ("pattern", &report.pattern),
        ("final", &report.final_score),
    ] {
        tracing::info!(
            factor,
            mean = stats.mean,
            max = stats.max,
            elevated = stats.elevated,
            "Risk factor stats"
        );
    }
    for bucket in &report.distribution {
        tracing::info!(
            low = bucket.low,
            high = bucket.high,
            count = bucket.count,
            percent = bucket.percent,
            "Risk score range"
        );
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// One alert per transaction above the high-risk threshold.
pub fn generate_alerts(txs: &[Transaction], thresholds: &ThresholdConfig) -> Vec<Alert> {
    let alerts: Vec<Alert> = txs
        .iter()
        .filter(|tx| tx.risk_score > thresholds.high_risk)
        .map(|tx| Alert {
            timestamp: tx.timestamp,
            source: tx.source.clone(),
            destination: tx.destination.clone(),
            amount: tx.amount,
            risk_score: tx.risk_score,
            risk_type: tx.risk_type,
            level: if tx.risk_score > thresholds.very_high_risk {
                AlertLevel::High
            } else {
                AlertLevel::Medium
            },
            description: format!(
                "Account {} sent {} of {:.2} to {} ({})",
                tx.source,
                tx.kind.as_str(),
                tx.amount,
                tx.destination,
                tx.risk_type.label()
            ),
        })
        .collect();

    tracing::info!(count = alerts.len(), "Generated alerts");
    alerts
}

// ============================================================================
// TESTS
// ============================================================================
