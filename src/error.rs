//! Error types for the background removal pipeline

use crate::models::BackendKind;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error taxonomy for initialization, processing and model management
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Every backend in the selection plan failed to load
    #[error("Initialization failed: {}", format_attempts(.attempts))]
    Init {
        /// One entry per failed load attempt, in attempt order
        attempts: Vec<(BackendKind, String)>,
    },

    /// `process()` was called before a successful `initialize()`
    #[error("Pipeline not initialized: call initialize() first")]
    NotInitialized,

    /// Malformed or zero-sized input image
    #[error("Preprocessing error: {0}")]
    Preprocess(String),

    /// Backend execution fault during a `process()` call
    #[error("Inference error on {backend} backend: {message}")]
    Inference {
        backend: BackendKind,
        message: String,
        /// The loaded model can no longer be used and must be re-initialized
        unrecoverable: bool,
    },

    /// Internal consistency failure between mask and image
    #[error("Composite error: {0}")]
    Composite(String),

    /// Model loading or parsing errors inside a backend factory
    #[error("Model error: {0}")]
    Model(String),

    /// Model download failures
    #[error("Network error: {0}")]
    Network(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backend selection did not finish within the configured deadline
    #[error("Initialization timed out after {0:?}")]
    Timeout(Duration),

    /// Processing was cancelled by the caller
    #[error("Processing cancelled")]
    Cancelled,
}

fn format_attempts(attempts: &[(BackendKind, String)]) -> String {
    if attempts.is_empty() {
        return "no backend was attempted".to_string();
    }
    attempts
        .iter()
        .map(|(kind, error)| format!("{kind}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BgRemovalError {
    /// Create a new preprocessing error
    pub fn preprocess<S: Into<String>>(msg: S) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a recoverable inference error for the given backend
    pub fn inference<S: Into<String>>(backend: BackendKind, msg: S) -> Self {
        Self::Inference {
            backend,
            message: msg.into(),
            unrecoverable: false,
        }
    }

    /// Create an inference error that invalidates the loaded model
    pub fn inference_unrecoverable<S: Into<String>>(backend: BackendKind, msg: S) -> Self {
        Self::Inference {
            backend,
            message: msg.into(),
            unrecoverable: true,
        }
    }

    /// Create a new composite error
    pub fn composite<S: Into<String>>(msg: S) -> Self {
        Self::Composite(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create network error with context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Whether the caller can retry or correct the call without re-initializing
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Init { .. } | Self::Composite(_) => false,
            Self::Inference { unrecoverable, .. } => !unrecoverable,
            _ => true,
        }
    }

    /// Whether this error means the loaded backend handle must be dropped
    #[must_use]
    pub fn invalidates_backend(&self) -> bool {
        matches!(
            self,
            Self::Inference {
                unrecoverable: true,
                ..
            }
        )
    }
}
