//! ONNX scoring backend
//!
//! Uses the `ort` crate for ONNX Runtime. The model takes one `[n, 6]` float
//! input of normalized node features and returns either logits (neural) or
//! class probabilities / labels (classifier). An optional second output may
//! carry node embeddings.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ort::session::{Session, SessionOutputs};
use ort::value::Tensor;

use crate::config::ModelConfig;
use crate::model::{ModelError, ModelKind, NodeBatch, ScoreOutput, ScoringModel};

pub struct OnnxScoringModel {
    session: Mutex<Session>,
    kind: ModelKind,
    input_name: String,
    output_name: String,
    embedding_output: String,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxScoringModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxScoringModel")
            .field("kind", &self.kind)
            .field("input_name", &self.input_name)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OnnxScoringModel {
    /// Load an ONNX model.
    ///
    /// Returns `ModelError::ModelNotFound` if the file is missing.
    pub fn new(
        path: &Path,
        kind: ModelKind,
        config: &ModelConfig,
        dimensions: usize,
    ) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        if kind == ModelKind::Features {
            return Err(ModelError::Unsupported(
                "feature pass-through has no ONNX form".to_string(),
            ));
        }

        let threads = config.onnx_threads.max(1);
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            kind,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            embedding_output: config.embedding_output.clone(),
            dimensions,
        })
    }

    /// Run the session on a batch and hand the outputs to `extract`.
    fn run<T>(
        &self,
        batch: &NodeBatch<'_>,
        extract: impl FnOnce(&SessionOutputs) -> Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        let (rows, cols) = batch.normalized.dim();
        let data: Vec<f32> = batch.normalized.iter().copied().collect();
        let input = Tensor::from_array((vec![rows as i64, cols as i64], data))
            .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::OnnxInference(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| ModelError::OnnxInference(e.to_string()))?;

        extract(&outputs)
    }

    fn score_output(&self, outputs: &SessionOutputs, n: usize) -> Result<ScoreOutput, ModelError> {
        if self.kind == ModelKind::Neural {
            let value = if self.output_name.is_empty() {
                &outputs[0]
            } else {
                outputs
                    .get(self.output_name.as_str())
                    .ok_or_else(|| ModelError::OnnxInference(format!(
                        "missing output {}",
                        self.output_name
                    )))?
            };
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::OnnxInference(e.to_string()))?;
            return column_values(shape, data, n, 0).map(ScoreOutput::Logits);
        }

        // Classifier: prefer a two-column probability tensor, skipping label outputs.
        for (name, value) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                if shape.len() == 2 && shape[1] == 2 {
                    return column_values(shape, data, n, 1).map(ScoreOutput::Probabilities);
                }
            }
        }

        let value = &outputs[0];
        if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
            return column_values(shape, data, n, 0).map(ScoreOutput::Labels);
        }
        let (shape, data) = value
            .try_extract_tensor::<i64>()
            .map_err(|e| ModelError::OnnxInference(e.to_string()))?;
        let labels: Vec<f32> = data.iter().map(|&v| v as f32).collect();
        column_values(shape, &labels, n, 0).map(ScoreOutput::Labels)
    }
}

/// Pick column `col` of an `[n]` or `[n, k]` output.
fn column_values(
    shape: &[i64],
    data: &[f32],
    n: usize,
    col: usize,
) -> Result<Vec<f32>, ModelError> {
    let shape_err = || ModelError::InvalidShape {
        expected: format!("[{n}] or [{n}, k>{col}]"),
        actual: format!("{shape:?}"),
    };
    match shape {
        [rows] if *rows as usize == n && col == 0 => Ok(data.to_vec()),
        [rows, k] if *rows as usize == n && (col as i64) < *k => {
            let k = *k as usize;
            Ok((0..n).map(|i| data[i * k + col]).collect())
        }
        _ => Err(shape_err()),
    }
}

impl ScoringModel for OnnxScoringModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn score(&self, batch: &NodeBatch<'_>) -> Result<ScoreOutput, ModelError> {
        let n = batch.len();
        self.run(batch, |outputs| self.score_output(outputs, n))
    }

    fn embed(&self, batch: &NodeBatch<'_>) -> Result<Option<Array2<f32>>, ModelError> {
        if self.embedding_output.is_empty() {
            return Ok(None);
        }
        let n = batch.len();
        let dims = self.dimensions;
        let raw = self.run(batch, |outputs| {
            let value = outputs.get(self.embedding_output.as_str()).ok_or_else(|| {
                ModelError::OnnxInference(format!("missing output {}", self.embedding_output))
            })?;
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::OnnxInference(e.to_string()))?;
            match &shape[..] {
                [rows, width] if *rows as usize == n => {
                    Array2::from_shape_vec((n, *width as usize), data.to_vec())
                        .map_err(|e| ModelError::OnnxInference(e.to_string()))
                }
                other => Err(ModelError::InvalidShape {
                    expected: format!("[{n}, d]"),
                    actual: format!("{other:?}"),
                }),
            }
        })?;
        Ok(Some(crate::model::pad_features(raw.view(), dims)))
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

// ============================================================================
// TESTS
// ============================================================================
