//! Error types for textserve.
//!
//! Uses `thiserror` for structured error variants covering model loading,
//! pipeline execution, configuration, and batch submission.
//!
//! Load and execution failures are ordinary outcomes: the loader reports them
//! as `false`, the dispatcher turns them into failure responses. They are
//! typed here so each layer can decide how to surface them.

use crate::types::ModelKey;

/// Top-level error type for the textserve core library.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}

/// Errors from bringing a model into memory.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Model {key} is not registered")]
    NotRegistered { key: ModelKey },

    #[error("Failed to build pipeline for {key}: {message}")]
    Build { key: ModelKey, message: String },
}

/// Errors raised by a pipeline backend while building or invoking a model.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Backend request failed: {message}")]
    Request { message: String },

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Backend response parse error: {message}")]
    ResponseParse { message: String },

    #[error("{message}")]
    Execution { message: String },
}

/// Errors from running a request against a loaded model.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Model {key} not available")]
    ModelUnavailable { key: ModelKey },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{message}")]
    DegenerateOutput { message: String },

    #[error("Pipeline panicked: {message}")]
    Panicked { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from batch submission.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("At least one request is required")]
    Empty,

    #[error("Batch of {size} requests exceeds the maximum of {max}")]
    TooLarge { size: usize, max: usize },
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
