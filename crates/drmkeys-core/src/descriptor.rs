//! Decrypt descriptors: the identity of one decryption key.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{KeyId, KeySystemFormat};

/// Identifies one decryption key, as announced by a playlist key tag or by
/// host-delivered init data.
///
/// `key_id` must be globally unique per logical key across the session
/// registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptDescriptor {
    pub key_id: Option<KeyId>,
    pub key_format: String,
    pub pssh: Option<Bytes>,
    pub uri: String,
    pub method: String,
}

impl DecryptDescriptor {
    pub fn new(key_format: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            key_id: None,
            key_format: key_format.into(),
            pssh: None,
            uri: uri.into(),
            method: "SAMPLE-AES".to_string(),
        }
    }

    pub fn with_key_id(mut self, key_id: KeyId) -> Self {
        self.key_id = Some(key_id);
        self
    }

    pub fn with_pssh(mut self, pssh: impl Into<Bytes>) -> Self {
        self.pssh = Some(pssh.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// The key system selected by this descriptor's key format, if known.
    pub fn format(&self) -> Option<KeySystemFormat> {
        KeySystemFormat::parse(&self.key_format)
    }

    /// Registry key for this descriptor.
    pub fn key_id_hex(&self) -> Option<String> {
        self.key_id.as_ref().map(KeyId::to_hex)
    }

    /// Whether late-arriving init data carrying `key_id` belongs to this key.
    ///
    /// Matches on exact key id, or when the key id's hex appears inside the
    /// key URI once separators are stripped (e.g. `skd://` URIs carrying a
    /// UUID).
    pub fn matches_key_id(&self, key_id: &KeyId) -> bool {
        let hex = key_id.to_hex();
        if self.key_id_hex().as_deref() == Some(hex.as_str()) {
            return true;
        }
        if hex.is_empty() {
            return false;
        }
        let uri: String = self
            .uri
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        uri.contains(&hex)
    }

    /// Human readable summary used in log lines.
    pub fn details(&self) -> String {
        format!(
            "(keyId: {} format: \"{}\" method: {} uri: {})",
            self.key_id_hex().unwrap_or_default(),
            self.key_format,
            self.method,
            self.uri
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kid(hex: &str) -> KeyId {
        KeyId::from_hex(hex).unwrap()
    }

    #[test]
    fn test_matches_exact_key_id() {
        let desc = DecryptDescriptor::new(KeySystemFormat::FairPlay.as_str(), "skd://other")
            .with_key_id(kid("aabb"));
        assert!(desc.matches_key_id(&kid("aabb")));
        assert!(!desc.matches_key_id(&kid("ccdd")));
    }

    #[test]
    fn test_matches_uri_with_separators() {
        let desc = DecryptDescriptor::new(
            KeySystemFormat::FairPlay.as_str(),
            "skd://AABBCCDD-EEFF-0011-2233-445566778899",
        )
        .with_key_id(kid("01"));
        assert!(desc.matches_key_id(&kid("aabbccddeeff00112233445566778899")));
    }

    #[test]
    fn test_format_lookup() {
        let desc = DecryptDescriptor::new("com.microsoft.playready", "data:text/plain;base64,AA");
        assert_eq!(desc.format(), Some(KeySystemFormat::PlayReady));
        assert_eq!(desc.key_id_hex(), None);
    }
}
