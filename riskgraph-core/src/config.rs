use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub link_prediction: LinkPredictionConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    pub high_risk: f64,
    pub very_high_risk: f64,
    pub suspicious: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            high_risk: 0.7,
            very_high_risk: 0.8,
            suspicious: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// Standard deviation of the anti-clustering jitter; 0 disables it.
    pub jitter_sigma: f64,
    /// Seed for every random source of one analysis pass; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            jitter_sigma: 0.05,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    pub max_transactions: usize,
    pub suspicious_floor: f64,
    pub suspicious_share: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            suspicious_floor: 0.4,
            suspicious_share: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Path to an ONNX scoring model. Empty means no model is loaded.
    pub path: String,
    /// "neural" (logit output) or "classifier" (probability / label output).
    pub kind: String,
    pub input_name: String,
    /// Score output; empty takes the first output.
    pub output_name: String,
    /// Optional output carrying per-node embeddings.
    pub embedding_output: String,
    pub onnx_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            kind: "neural".to_string(),
            input_name: "features".to_string(),
            output_name: String::new(),
            embedding_output: String::new(),
            onnx_threads: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    pub batch_size: usize,
    pub accelerated_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 32,
            batch_size: 256,
            accelerated_batch_size: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ComputeConfig {
    /// Enables large batches, the rayon worker pool and precomputed distance tiles.
    pub accelerated: bool,
    /// Worker threads for the pool; 0 sizes it from the CPU count.
    pub worker_threads: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinkPredictionConfig {
    pub similarity_threshold: f64,
    pub block_size: usize,
    pub max_candidates: usize,
    pub fallback_max_candidates: usize,
}

impl Default for LinkPredictionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.65,
            block_size: 1000,
            max_candidates: 100,
            fallback_max_candidates: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    pub eps: f64,
    pub min_samples: usize,
    pub tile_size: usize,
    pub fallback_seed_limit: usize,
    pub fallback_inclusion_probability: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: 0.4,
            min_samples: 3,
            tile_size: 1024,
            fallback_seed_limit: 20,
            fallback_inclusion_probability: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    pub max_edges: usize,
    pub aggregation_threshold: usize,
    pub focus_threshold: f64,
    pub max_paths: usize,
    pub cluster_digest_min_risk: f64,
    pub cluster_digest_members: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_edges: 3000,
            aggregation_threshold: 5,
            focus_threshold: 0.6,
            max_paths: 10,
            cluster_digest_min_risk: 0.5,
            cluster_digest_members: 3,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Reject out-of-range parameters before any pipeline stage runs.
    pub fn validate(&self) -> Result<(), EngineError> {
        let unit_interval = [
            ("thresholds.high_risk", self.thresholds.high_risk),
            ("thresholds.very_high_risk", self.thresholds.very_high_risk),
            ("thresholds.suspicious", self.thresholds.suspicious),
            ("sampling.suspicious_floor", self.sampling.suspicious_floor),
            ("sampling.suspicious_share", self.sampling.suspicious_share),
            ("link_prediction.similarity_threshold", self.link_prediction.similarity_threshold),
            (
                "clustering.fallback_inclusion_probability",
                self.clustering.fallback_inclusion_probability,
            ),
            ("summary.focus_threshold", self.summary.focus_threshold),
            ("summary.cluster_digest_min_risk", self.summary.cluster_digest_min_risk),
        ];
        for (name, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }

        if !self.clustering.eps.is_finite() || self.clustering.eps <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "clustering.eps must be positive, got {}",
                self.clustering.eps
            )));
        }
        if !self.scoring.jitter_sigma.is_finite() || self.scoring.jitter_sigma < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "scoring.jitter_sigma must be non-negative, got {}",
                self.scoring.jitter_sigma
            )));
        }

        let non_zero = [
            ("clustering.min_samples", self.clustering.min_samples),
            ("clustering.tile_size", self.clustering.tile_size),
            ("embedding.dimensions", self.embedding.dimensions),
            ("embedding.batch_size", self.embedding.batch_size),
            ("embedding.accelerated_batch_size", self.embedding.accelerated_batch_size),
            ("link_prediction.block_size", self.link_prediction.block_size),
            ("sampling.max_transactions", self.sampling.max_transactions),
            ("summary.max_edges", self.summary.max_edges),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(EngineError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }

        match self.model.kind.as_str() {
            "neural" | "classifier" => Ok(()),
            other => Err(EngineError::InvalidConfig(format!(
                "model.kind must be \"neural\" or \"classifier\", got \"{other}\""
            ))),
        }
    }

    /// Node batch size for embedding and risk inference.
    pub fn batch_size(&self) -> usize {
        if self.compute.accelerated {
            self.embedding.accelerated_batch_size
        } else {
            self.embedding.batch_size
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();

        assert_eq!(config.thresholds.high_risk, 0.7);
        assert_eq!(config.thresholds.very_high_risk, 0.8);
        assert_eq!(config.thresholds.suspicious, 0.5);
        assert_eq!(config.sampling.max_transactions, 10_000);
        assert_eq!(config.summary.max_edges, 3000);
        assert_eq!(config.summary.aggregation_threshold, 5);
        assert_eq!(config.clustering.eps, 0.4);
        assert_eq!(config.clustering.min_samples, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_size_depends_on_acceleration() {
        let mut config = EngineConfig::default();
        assert_eq!(config.batch_size(), 256);

        config.compute.accelerated = true;
        assert_eq!(config.batch_size(), 1024);
    }

    #[test]
    fn test_validate_rejects_negative_eps() {
        let mut config = EngineConfig::default();
        config.clustering.eps = -0.1;

        match config.validate() {
            Err(EngineError::InvalidConfig(msg)) => assert!(msg.contains("eps"), "msg: {msg}"),
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_min_samples() {
        let mut config = EngineConfig::default();
        config.clustering.min_samples = 0;

        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_threshold_outside_unit_interval() {
        let mut config = EngineConfig::default();
        config.thresholds.suspicious = 1.5;

        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_model_kind() {
        let mut config = EngineConfig::default();
        config.model.kind = "transformer".to_string();

        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let path = std::env::temp_dir().join(format!(
            "riskgraph-config-test-{}.toml",
            std::process::id()
        ));
        let toml = "[clustering]\neps = 0.25\nmin_samples = 4\ntile_size = 64\n\
                    fallback_seed_limit = 20\nfallback_inclusion_probability = 0.3\n";
        std::fs::write(&path, toml).expect("write temp config");

        let config = EngineConfig::load(path.to_str().unwrap()).expect("config should load");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.clustering.eps, 0.25);
        assert_eq!(config.clustering.min_samples, 4);
        assert_eq!(config.summary.max_edges, 3000);
    }
}
