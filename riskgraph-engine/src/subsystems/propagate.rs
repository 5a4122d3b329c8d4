//! Propagate subsystem: per-node risk probability
//!
//! Runs the scoring model over node batches. Logits are squashed with a
//! sigmoid; probabilities and labels are clamped into `[0, 1]`. A batch whose
//! output is unusable is recomputed with the deterministic fallback formula.

use ndarray::s;
use riskgraph_core::{
    fallback_risk, EngineConfig, NodeBatch, NodeFeatures, ScoreOutput, ScoringModel,
};

use super::{run_batches, BatchOutcome};

#[derive(Debug, Clone)]
pub struct RiskPropagation {
    /// Risk per node index, each in `[0, 1]`.
    pub risks: Vec<f64>,
    pub fallback_batches: usize,
    pub high_risk_count: usize,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map a model output to probabilities, rejecting wrong lengths or non-finite values.
fn to_probabilities(output: ScoreOutput, expected: usize) -> Result<Vec<f64>, String> {
    if output.len() != expected {
        return Err(format!("model returned {} scores for {} nodes", output.len(), expected));
    }
    let (values, squash) = match output {
        ScoreOutput::Logits(v) => (v, true),
        ScoreOutput::Probabilities(v) | ScoreOutput::Labels(v) => (v, false),
    };
    values
        .into_iter()
        .map(|v| {
            let v = v as f64;
            if !v.is_finite() {
                return Err(format!("non-finite score {v}"));
            }
            Ok(if squash { sigmoid(v) } else { v.clamp(0.0, 1.0) })
        })
        .collect()
}

fn fallback_batch(batch: &NodeBatch<'_>) -> Vec<f64> {
    batch.raw.rows().into_iter().map(fallback_risk).collect()
}

pub fn propagate_risk(
    model: Option<&dyn ScoringModel>,
    features: &NodeFeatures,
    config: &EngineConfig,
) -> RiskPropagation {
    let n = features.raw.nrows();
    let outcomes = run_batches(n, config.batch_size(), config.compute.accelerated, |range| {
        let batch = NodeBatch {
            offset: range.start,
            raw: features.raw.slice(s![range.start..range.end, ..]),
            normalized: features.normalized.slice(s![range.start..range.end, ..]),
        };
        let Some(model) = model else {
            return BatchOutcome::Fallback {
                value: fallback_batch(&batch),
                reason: "no model loaded".to_string(),
            };
        };

        match model
            .score(&batch)
            .map_err(|e| e.to_string())
            .and_then(|output| to_probabilities(output, batch.len()))
        {
            Ok(risks) => BatchOutcome::Computed(risks),
            Err(reason) => {
                tracing::warn!(
                    offset = range.start,
                    rows = range.len(),
                    model = model.name(),
                    error = %reason,
                    "Risk batch failed; using fallback formula"
                );
                BatchOutcome::Fallback {
                    value: fallback_batch(&batch),
                    reason,
                }
            }
        }
    });

    let mut risks = Vec::with_capacity(n);
    let mut fallback_batches = 0;
    for (_, outcome) in outcomes {
        if outcome.is_fallback() {
            fallback_batches += 1;
        }
        risks.extend(outcome.into_value());
    }

    let high_risk_count = risks
        .iter()
        .filter(|&&r| r >= config.thresholds.high_risk)
        .count();
    tracing::info!(
        nodes = n,
        fallback_batches,
        high_risk_count,
        "Propagated node risk"
    );

    RiskPropagation {
        risks,
        fallback_batches,
        high_risk_count,
    }
}

// ============================================================================
// TESTS
// ============================================================================
