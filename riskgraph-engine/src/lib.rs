pub mod pipeline;
pub mod subsystems;

pub use pipeline::{AnalysisPipeline, AnalysisReport, AnalysisRequest};
