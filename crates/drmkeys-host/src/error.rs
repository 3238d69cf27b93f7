//! Error types for the host seam.

use thiserror::Error;

/// Errors raised by host CDM operations.
///
/// Cloneable because host failures are folded into memoized acquisitions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostError {
    /// The host does not support the requested key system or configuration.
    #[error("key system not supported: {0}")]
    NotSupported(String),

    /// The host rejected the call.
    #[error("rejected by host: {0}")]
    Rejected(String),

    /// The call is not valid in the current host state.
    #[error("invalid host state: {0}")]
    InvalidState(String),

    /// The session or CDM was already closed.
    #[error("closed")]
    Closed,
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
