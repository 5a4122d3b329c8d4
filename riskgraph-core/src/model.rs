//! Scoring model abstraction
//!
//! Provides a `ScoringModel` trait with implementations for:
//! - **Feature**: deterministic formulas over the node features
//! - **ONNX**: a neural or classifier model run through ONNX Runtime
//!
//! Batches are row slices of the node feature matrices. A model may lack the
//! embedding capability, signalled by `Ok(None)` from [`ScoringModel::embed`].

use std::path::Path;
use std::sync::Arc;

use ndarray::{s, Array2, ArrayView1, ArrayView2};
use serde::Serialize;
use thiserror::Error;

use crate::config::ModelConfig;

// ============================================================================
// ScoringModel trait
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Emits raw logits, squashed by a sigmoid downstream.
    Neural,
    /// Emits class probabilities, or plain labels when probabilities are absent.
    Classifier,
    /// Pass-through of the engineered features.
    Features,
}

impl ModelKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "neural" => Some(Self::Neural),
            "classifier" => Some(Self::Classifier),
            "features" => Some(Self::Features),
            _ => None,
        }
    }
}

/// Contiguous rows `offset..offset + len` of the node feature matrices.
#[derive(Debug, Clone, Copy)]
pub struct NodeBatch<'a> {
    pub offset: usize,
    pub raw: ArrayView2<'a, f32>,
    pub normalized: ArrayView2<'a, f32>,
}

impl NodeBatch<'_> {
    pub fn len(&self) -> usize {
        self.raw.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.nrows() == 0
    }
}

/// One value per batch row, typed by what the model produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutput {
    Logits(Vec<f32>),
    Probabilities(Vec<f32>),
    Labels(Vec<f32>),
}

impl ScoreOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Logits(v) | Self::Probabilities(v) | Self::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait ScoringModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Per-node risk output for one batch.
    fn score(&self, batch: &NodeBatch<'_>) -> Result<ScoreOutput, ModelError>;

    /// Per-node embeddings `[batch.len(), dims]`, or `None` when unsupported.
    fn embed(&self, batch: &NodeBatch<'_>) -> Result<Option<Array2<f32>>, ModelError>;

    /// Model name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not found at {path}")]
    ModelNotFound { path: String },

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Invalid output shape: expected {expected}, got {actual}")]
    InvalidShape { expected: String, actual: String },

    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

// ============================================================================
// Deterministic formulas
// ============================================================================

/// Model-free node risk from a raw feature row.
///
/// Base risk, +0.2 above 1M total, +0.15 for an out/in degree ratio outside
/// `[0.2, 5]` when both degrees are positive, +0.1 above 100 transactions.
pub fn fallback_risk(raw: ArrayView1<'_, f32>) -> f64 {
    let transaction_count = raw[0] as f64;
    let total_amount = raw[1] as f64;
    let in_degree = raw[4] as f64;
    let out_degree = raw[5] as f64;

    let mut risk = raw[2] as f64;
    if total_amount > 1_000_000.0 {
        risk += 0.2;
    }
    if in_degree > 0.0 && out_degree > 0.0 {
        let ratio = out_degree / in_degree;
        if !(0.2..=5.0).contains(&ratio) {
            risk += 0.15;
        }
    }
    if transaction_count > 100.0 {
        risk += 0.1;
    }
    risk.min(1.0)
}

/// Zero-pad or truncate feature rows to `dims` columns.
pub fn pad_features(features: ArrayView2<'_, f32>, dims: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((features.nrows(), dims));
    let width = features.ncols().min(dims);
    out.slice_mut(s![.., ..width])
        .assign(&features.slice(s![.., ..width]));
    out
}

// ============================================================================
// FeatureModel
// ============================================================================

/// Stand-in model used when a configured model cannot be loaded.
///
/// Embeddings are the padded normalized features; scores come from
/// [`fallback_risk`].
#[derive(Debug, Clone)]
pub struct FeatureModel {
    dimensions: usize,
}

impl FeatureModel {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl ScoringModel for FeatureModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Features
    }

    fn score(&self, batch: &NodeBatch<'_>) -> Result<ScoreOutput, ModelError> {
        Ok(ScoreOutput::Probabilities(
            batch
                .raw
                .rows()
                .into_iter()
                .map(|row| fallback_risk(row) as f32)
                .collect(),
        ))
    }

    fn embed(&self, batch: &NodeBatch<'_>) -> Result<Option<Array2<f32>>, ModelError> {
        Ok(Some(pad_features(batch.normalized, self.dimensions)))
    }

    fn name(&self) -> &str {
        "features"
    }
}

/// Load the configured model.
///
/// No configured path means no model at all. A configured model that fails to
/// load degrades to [`FeatureModel`].
pub fn load_model(config: &ModelConfig, dimensions: usize) -> Option<Arc<dyn ScoringModel>> {
    if config.path.is_empty() {
        tracing::warn!("No scoring model configured; node analysis uses fallback formulas");
        return None;
    }

    let Some(kind) = ModelKind::parse(&config.kind) else {
        tracing::warn!(kind = %config.kind, "Unknown model kind; using feature model");
        return Some(Arc::new(FeatureModel::new(dimensions)));
    };
    if kind == ModelKind::Features {
        return Some(Arc::new(FeatureModel::new(dimensions)));
    }

    let path = Path::new(&config.path);
    match crate::onnx_model::OnnxScoringModel::new(path, kind, config, dimensions) {
        Ok(model) => {
            tracing::info!(path = %config.path, kind = ?kind, "Loaded ONNX scoring model");
            Some(Arc::new(model))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.path,
                "Model load failed; using feature model"
            );
            Some(Arc::new(FeatureModel::new(dimensions)))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
