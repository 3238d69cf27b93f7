//! Error types for license and certificate transport.

use thiserror::Error;

use drmkeys_core::{ErrorKind, KeySystemError};

/// Errors raised by the license exchange.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LicenseError {
    /// Non-retriable status, or the retry budget is spent.
    #[error("license request failed after {attempts} attempt(s): {status} {status_text}")]
    RequestFailed {
        status: u16,
        status_text: String,
        attempts: u32,
    },

    /// The transport could not complete the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The PlayReady key message could not be unwrapped.
    #[error("invalid key message: {0}")]
    KeyMessage(String),

    /// Site request setup failed while running in strict mode.
    #[error("license request setup failed: {0}")]
    Setup(String),
}

impl From<LicenseError> for KeySystemError {
    fn from(err: LicenseError) -> Self {
        KeySystemError::new(ErrorKind::LicenseRequestFailed, err.to_string())
    }
}

/// Errors raised by the certificate loader.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("HTTP {status}: {text}")]
    Http { status: u16, text: String },

    #[error("timed out")]
    Timeout,

    #[error("aborted")]
    Aborted,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for license operations.
pub type Result<T> = std::result::Result<T, LicenseError>;
