//! Strong type definitions for key systems and key identifiers.
//!
//! Key systems are a closed set and are used as negotiation keys, so they are
//! modelled as a `Copy` enum rather than free-form strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InitDataError;

/// A content-protection key system the player knows how to negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeySystem {
    #[serde(rename = "com.apple.fps")]
    FairPlay,
    #[serde(rename = "com.widevine.alpha")]
    Widevine,
    #[serde(rename = "com.microsoft.playready")]
    PlayReady,
    #[serde(rename = "org.w3.clearkey")]
    ClearKey,
}

impl KeySystem {
    /// All key systems in the order they are attempted when falling back to
    /// the configured set.
    pub const ALL: [KeySystem; 4] = [
        KeySystem::FairPlay,
        KeySystem::Widevine,
        KeySystem::PlayReady,
        KeySystem::ClearKey,
    ];

    /// The reverse-domain name the host uses to identify the key system.
    pub const fn domain(&self) -> &'static str {
        match self {
            KeySystem::FairPlay => "com.apple.fps",
            KeySystem::Widevine => "com.widevine.alpha",
            KeySystem::PlayReady => "com.microsoft.playready",
            KeySystem::ClearKey => "org.w3.clearkey",
        }
    }

    /// The playlist key format that selects this key system.
    pub const fn format(&self) -> KeySystemFormat {
        match self {
            KeySystem::FairPlay => KeySystemFormat::FairPlay,
            KeySystem::Widevine => KeySystemFormat::Widevine,
            KeySystem::PlayReady => KeySystemFormat::PlayReady,
            KeySystem::ClearKey => KeySystemFormat::ClearKey,
        }
    }

    /// Init data types the host is asked to accept for this key system.
    pub fn init_data_types(&self) -> &'static [&'static str] {
        match self {
            KeySystem::FairPlay => &["cenc", "sinf"],
            KeySystem::Widevine | KeySystem::PlayReady => &["cenc"],
            KeySystem::ClearKey => &["cenc", "keyids"],
        }
    }
}

impl fmt::Display for KeySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}

impl FromStr for KeySystem {
    type Err = InitDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeySystem::ALL
            .into_iter()
            .find(|ks| ks.domain() == s)
            .ok_or_else(|| InitDataError::UnknownKeySystem(s.to_string()))
    }
}

/// A key format as it appears on playlist key tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeySystemFormat {
    FairPlay,
    Widevine,
    PlayReady,
    ClearKey,
}

impl KeySystemFormat {
    pub const fn as_str(&self) -> &'static str {
        match self {
            KeySystemFormat::FairPlay => "com.apple.streamingkeydelivery",
            KeySystemFormat::Widevine => "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
            KeySystemFormat::PlayReady => "com.microsoft.playready",
            KeySystemFormat::ClearKey => "org.w3.clearkey",
        }
    }

    /// Parse a playlist key format. Unknown formats (e.g. `identity`) yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        [
            KeySystemFormat::FairPlay,
            KeySystemFormat::Widevine,
            KeySystemFormat::PlayReady,
            KeySystemFormat::ClearKey,
        ]
        .into_iter()
        .find(|f| f.as_str() == s)
    }

    pub const fn key_system(&self) -> KeySystem {
        match self {
            KeySystemFormat::FairPlay => KeySystem::FairPlay,
            KeySystemFormat::Widevine => KeySystem::Widevine,
            KeySystemFormat::PlayReady => KeySystem::PlayReady,
            KeySystemFormat::ClearKey => KeySystem::ClearKey,
        }
    }
}

impl fmt::Display for KeySystemFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a single content-decryption key.
///
/// Key ids correlate playlist metadata with host-delivered init data; the
/// lowercase hex form is the registry key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex dump, used as the registry key.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse from hex string. Separators (`-`) are ignored so UUID-style ids
    /// are accepted.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        Ok(Self(hex::decode(cleaned)?))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.to_hex())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 16]> for KeyId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes.to_vec())
    }
}
