use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Malformed spaces, mismatched dimensions or out-of-range hyperparameters.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot sample from an empty replay buffer")]
    EmptyBuffer,

    /// Weight snapshots or coupling layouts that do not line up.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("variable map lock poisoned")]
    Lock,
}

impl AgentError {
    pub fn config(message: impl Into<String>) -> Self {
        AgentError::Config(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        AgentError::Shape(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
