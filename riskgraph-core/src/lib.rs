pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod models;
pub mod onnx_model;
pub mod scoring;

pub use config::EngineConfig;
pub use error::EngineError;
pub use graph::{GraphBuilder, NodeFeatures, TransactionGraph, FEATURE_DIM};
pub use model::{
    fallback_risk, load_model, pad_features, FeatureModel, ModelError, ModelKind, NodeBatch,
    ScoreOutput, ScoringModel,
};
pub use onnx_model::OnnxScoringModel;
pub use scoring::{
    generate_alerts, ConstantNoise, GaussianNoise, NoiseSource, RiskScorer, ScoringOutcome,
    ScoringReport,
};
