//! Key statuses and session message types reported by the host.

use std::fmt;

use bytes::Bytes;

/// Usability state of a key, as observed from the host.
///
/// The host is the source of truth for transitions; this crate only observes
/// and reacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    Pending,
    Usable,
    UsableInFuture,
    OutputRestricted,
    InternalError,
    Expired,
    Released,
    /// `output-downscaled`: usable at reduced quality.
    OutputDownscaled,
}

impl KeyStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "status-pending" | "pending" => KeyStatus::Pending,
            "usable" => KeyStatus::Usable,
            "usable-in-future" => KeyStatus::UsableInFuture,
            "output-restricted" => KeyStatus::OutputRestricted,
            "internal-error" => KeyStatus::InternalError,
            "expired" => KeyStatus::Expired,
            "released" => KeyStatus::Released,
            "output-downscaled" => KeyStatus::OutputDownscaled,
            _ => return None,
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Pending => "status-pending",
            KeyStatus::Usable => "usable",
            KeyStatus::UsableInFuture => "usable-in-future",
            KeyStatus::OutputRestricted => "output-restricted",
            KeyStatus::InternalError => "internal-error",
            KeyStatus::Expired => "expired",
            KeyStatus::Released => "released",
            KeyStatus::OutputDownscaled => "output-downscaled",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a message raised by a native session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    LicenseRequest,
    LicenseRenewal,
    LicenseRelease,
    IndividualizationRequest,
    Other(String),
}

impl MessageType {
    pub fn parse(s: &str) -> Self {
        match s {
            "license-request" => MessageType::LicenseRequest,
            "license-renewal" => MessageType::LicenseRenewal,
            "license-release" => MessageType::LicenseRelease,
            "individualization-request" => MessageType::IndividualizationRequest,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::LicenseRequest => "license-request",
            MessageType::LicenseRenewal => "license-renewal",
            MessageType::LicenseRelease => "license-release",
            MessageType::IndividualizationRequest => "individualization-request",
            MessageType::Other(s) => s,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loosely typed value delivered by the host in a key-status entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostValue {
    Bytes(Bytes),
    Text(String),
}

/// One `(key id, status)` entry as delivered by the host.
///
/// At least one platform delivers the pair swapped (status first, key id
/// second). [`RawKeyStatus::normalize`] disambiguates by value type; this is a
/// host-compatibility workaround, not a logic bug.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawKeyStatus {
    pub key_id: HostValue,
    pub status: HostValue,
}

impl RawKeyStatus {
    pub fn new(key_id: impl Into<Bytes>, status: KeyStatus) -> Self {
        Self {
            key_id: HostValue::Bytes(key_id.into()),
            status: HostValue::Text(status.as_str().to_string()),
        }
    }

    /// Same entry with the values swapped, as the quirky platform sends it.
    pub fn swapped(self) -> Self {
        Self {
            key_id: self.status,
            status: self.key_id,
        }
    }

    /// Resolve to a typed `(key id, status)` pair.
    ///
    /// Returns `None` when the entry carries no recognizable status.
    pub fn normalize(&self) -> Option<(Bytes, KeyStatus)> {
        let (key_id, status) = match (&self.key_id, &self.status) {
            (HostValue::Bytes(kid), HostValue::Text(status)) => (kid, status),
            (HostValue::Text(status), HostValue::Bytes(kid)) => (kid, status),
            _ => return None,
        };
        KeyStatus::parse(status).map(|s| (key_id.clone(), s))
    }
}
