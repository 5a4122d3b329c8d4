//! Embedder subsystem: one fixed-width embedding per node
//!
//! - Prefers the scoring model's embedding output
//! - Falls back to padded normalized features when the model cannot embed
//! - Zero-fills a batch whose model call fails, then carries on
//! - Uses independent random vectors when no model is loaded at all

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::Rng;
use riskgraph_core::{pad_features, EngineConfig, NodeBatch, NodeFeatures, ScoringModel};
use serde::Serialize;

use super::{run_batches, BatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Model,
    Random,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// `[node_count, dimensions]`, row `i` belongs to node index `i`.
    pub embeddings: Array2<f32>,
    pub source: EmbeddingSource,
    pub computed_batches: usize,
    pub fallback_batches: usize,
}

impl EmbeddingResult {
    /// False when every model batch failed and only zero rows remain.
    pub fn is_usable(&self) -> bool {
        self.source == EmbeddingSource::Random || self.computed_batches > 0
    }
}

pub fn compute_embeddings(
    model: Option<&dyn ScoringModel>,
    features: &NodeFeatures,
    config: &EngineConfig,
    rng: &mut StdRng,
) -> EmbeddingResult {
    let n = features.raw.nrows();
    let dims = config.embedding.dimensions;

    let Some(model) = model else {
        tracing::warn!(nodes = n, dims, "No model loaded; using random node embeddings");
        return EmbeddingResult {
            embeddings: Array2::from_shape_fn((n, dims), |_| rng.gen::<f32>()),
            source: EmbeddingSource::Random,
            computed_batches: 0,
            fallback_batches: 0,
        };
    };

    let batch_size = config.batch_size();
    let outcomes = run_batches(n, batch_size, config.compute.accelerated, |range| {
        let batch = NodeBatch {
            offset: range.start,
            raw: features.raw.slice(s![range.start..range.end, ..]),
            normalized: features.normalized.slice(s![range.start..range.end, ..]),
        };
        let zeros = || Array2::<f32>::zeros((range.len(), dims));

        match model.embed(&batch) {
            Ok(Some(vectors)) if vectors.nrows() == range.len() => {
                BatchOutcome::Computed(pad_features(vectors.view(), dims))
            }
            Ok(Some(vectors)) => {
                let reason = format!(
                    "model returned {} rows for a batch of {}",
                    vectors.nrows(),
                    range.len()
                );
                tracing::warn!(offset = range.start, %reason, "Embedding batch failed");
                BatchOutcome::Fallback {
                    value: zeros(),
                    reason,
                }
            }
            Ok(None) => BatchOutcome::Computed(pad_features(batch.normalized, dims)),
            Err(e) => {
                tracing::warn!(
                    offset = range.start,
                    rows = range.len(),
                    model = model.name(),
                    error = %e,
                    "Embedding batch failed; zero-filling"
                );
                BatchOutcome::Fallback {
                    value: zeros(),
                    reason: e.to_string(),
                }
            }
        }
    });

    let mut embeddings = Array2::<f32>::zeros((n, dims));
    let mut computed_batches = 0;
    let mut fallback_batches = 0;
    for (range, outcome) in outcomes {
        if outcome.is_fallback() {
            fallback_batches += 1;
        } else {
            computed_batches += 1;
        }
        embeddings
            .slice_mut(s![range.start..range.end, ..])
            .assign(&outcome.into_value());
    }

    tracing::info!(
        nodes = n,
        dims,
        batch_size,
        computed_batches,
        fallback_batches,
        model = model.name(),
        "Computed node embeddings"
    );

    EmbeddingResult {
        embeddings,
        source: EmbeddingSource::Model,
        computed_batches,
        fallback_batches,
    }
}

// ============================================================================
// TESTS
// ============================================================================
