//! Error types for drmkeys core.

use std::fmt;

use thiserror::Error;

/// The closed taxonomy of key-system failures.
///
/// Every failure surfaced to a caller or to the event bus carries one of
/// these kinds, together with a fatal flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// All key-system candidates were exhausted.
    NoAccess,
    /// No candidates and no configured key systems.
    NoConfiguredLicense,
    /// CDM handle creation (or anything unclassified around it) failed.
    NoKeys,
    /// Native `generateRequest` was rejected.
    NoSession,
    CertificateRequestFailed,
    CertificateUpdateFailed,
    /// Retry budget exhausted or a 4xx response.
    LicenseRequestFailed,
    /// Native `update` was rejected.
    SessionUpdateFailed,
    /// Key status changed to output-restricted (HDCP).
    StatusOutputRestricted,
    /// Key status changed to internal-error.
    StatusInternalError,
    DestroyMediaKeysError,
    DestroyCloseSessionError,
    DestroyRemoveSessionError,
    /// No media element attached, or the controller was torn down.
    InvalidState,
}

impl ErrorKind {
    /// Fatality of the kind when raised without an override.
    pub const fn default_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::NoSession
                | ErrorKind::StatusOutputRestricted
                | ErrorKind::DestroyMediaKeysError
                | ErrorKind::DestroyCloseSessionError
                | ErrorKind::DestroyRemoveSessionError
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoAccess => "keySystemNoAccess",
            ErrorKind::NoConfiguredLicense => "keySystemNoConfiguredLicense",
            ErrorKind::NoKeys => "keySystemNoKeys",
            ErrorKind::NoSession => "keySystemNoSession",
            ErrorKind::CertificateRequestFailed => "keySystemServerCertificateRequestFailed",
            ErrorKind::CertificateUpdateFailed => "keySystemServerCertificateUpdateFailed",
            ErrorKind::LicenseRequestFailed => "keySystemLicenseRequestFailed",
            ErrorKind::SessionUpdateFailed => "keySystemSessionUpdateFailed",
            ErrorKind::StatusOutputRestricted => "keySystemStatusOutputRestricted",
            ErrorKind::StatusInternalError => "keySystemStatusInternalError",
            ErrorKind::DestroyMediaKeysError => "keySystemDestroyMediaKeysError",
            ErrorKind::DestroyCloseSessionError => "keySystemDestroyCloseSessionError",
            ErrorKind::DestroyRemoveSessionError => "keySystemDestroyRemoveSessionError",
            ErrorKind::InvalidState => "keySystemInvalidState",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified key-system failure.
///
/// Cloneable so a memoized acquisition can hand the same failure to every
/// caller waiting on it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct KeySystemError {
    pub kind: ErrorKind,
    pub fatal: bool,
    pub message: String,
}

impl KeySystemError {
    /// Create an error with the kind's default fatality.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            fatal: kind.default_fatal(),
            message: message.into(),
        }
    }

    /// Override the fatal flag.
    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }
}

/// Errors raised while parsing init data or key messages.
#[derive(Debug, Error)]
pub enum InitDataError {
    #[error("init data too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("expected '{expected}' box, found '{found}'")]
    UnexpectedBox { expected: String, found: String },

    #[error("'schm' box missing or not cbcs/cenc with schi > tenc")]
    MissingTenc,

    #[error("invalid sinf json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid key message xml: {0}")]
    InvalidXml(String),

    #[error("cannot find <Challenge> in key message")]
    MissingChallenge,

    #[error("unknown key system: {0}")]
    UnknownKeySystem(String),
}

/// Result type for init data parsing.
pub type Result<T> = std::result::Result<T, InitDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fatality_matches_taxonomy() {
        assert!(ErrorKind::NoAccess.default_fatal());
        assert!(ErrorKind::LicenseRequestFailed.default_fatal());
        assert!(ErrorKind::StatusInternalError.default_fatal());
        assert!(!ErrorKind::NoSession.default_fatal());
        assert!(!ErrorKind::StatusOutputRestricted.default_fatal());
        assert!(!ErrorKind::DestroyRemoveSessionError.default_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = KeySystemError::new(ErrorKind::NoSession, "generateRequest rejected");
        assert_eq!(
            err.to_string(),
            "keySystemNoSession: generateRequest rejected"
        );
    }
}
