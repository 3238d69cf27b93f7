//! Error types for the controller.

use thiserror::Error;

pub use drmkeys_core::{ErrorKind, KeySystemError};

/// Errors loading a [`crate::DrmConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON or unknown key system.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, KeySystemError>;
