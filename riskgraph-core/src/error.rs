use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No input data: zero transactions supplied")]
    NoInputData,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}
