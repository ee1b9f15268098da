//! Error types for model construction, lifecycle calls and checkpoint I/O.

use std::path::PathBuf;
use thiserror::Error;

/// A specialized Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// The error type for model operations.
///
/// None of these are recovered inside the crate; they propagate to the
/// training loop or CLI unchanged.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model {0} not recognized")]
    UnknownModelKind(String),

    #[error(
        "Weights file not found: {}. Have you trained a model? No pretrained weights are shipped",
        path.display()
    )]
    CheckpointNotFound { path: PathBuf },

    #[error("learning rate policy [{0}] is not implemented")]
    UnsupportedPolicy(String),

    #[error("{0} not implemented")]
    NotImplemented(&'static str),

    #[error("Unknown semantic map: {0}")]
    UnknownMapName(String),

    #[error("State mismatch: missing keys {missing:?}, unexpected keys {unexpected:?}")]
    StateMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Shape mismatch for {key}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] safetensors::SafeTensorError),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl ModelError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(key: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        ModelError::ShapeMismatch {
            key: key.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        ModelError::InvalidState(msg.into())
    }
}

impl From<config::ConfigError> for ModelError {
    fn from(err: config::ConfigError) -> Self {
        ModelError::Config(err.to_string())
    }
}
