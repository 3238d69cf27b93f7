//! Controller configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use drmkeys_core::{DecryptDescriptor, DrmSystemOptions, KeySystem};
use drmkeys_license::{LicenseHooks, LoadPolicy};

use crate::error::ConfigError;

/// Per-key-system endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySystemConfig {
    pub license_url: Option<String>,
    pub server_certificate_url: Option<String>,
}

/// Policy for a `usable-in-future` key status while a request is pending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsableInFuturePolicy {
    /// Keep waiting until the key becomes `usable`.
    #[default]
    Wait,
    /// Treat the key as usable immediately.
    Resolve,
}

/// Site filter rewriting `(init data type, init data)` before a request is
/// generated. Returning `None` init data skips the request.
pub type GenerateRequestFilter = Arc<
    dyn Fn(&str, Option<&Bytes>, &DecryptDescriptor) -> anyhow::Result<(String, Option<Bytes>)>
        + Send
        + Sync,
>;

/// Site callbacks. Not serialized.
#[derive(Clone, Default)]
pub struct DrmHooks {
    pub generate_request: HashMap<KeySystem, GenerateRequestFilter>,
    pub license: LicenseHooks,
}

impl std::fmt::Debug for DrmHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmHooks")
            .field(
                "generate_request",
                &self.generate_request.keys().collect::<Vec<_>>(),
            )
            .field("license", &self.license)
            .finish()
    }
}

/// Configuration consumed by the key-system controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmConfig {
    pub eme_enabled: bool,
    /// Endpoints keyed by key-system domain (`com.widevine.alpha`, ...).
    pub drm_systems: BTreeMap<KeySystem, KeySystemConfig>,
    /// Widevine license URL used when `drm_systems` has no Widevine entry.
    pub widevine_license_url: Option<String>,
    pub drm_system_options: DrmSystemOptions,
    pub cert_load_policy: LoadPolicy,
    pub key_load_policy: LoadPolicy,
    /// Surface site callback failures instead of ignoring the callback.
    pub strict: bool,
    pub usable_in_future: UsableInFuturePolicy,
    #[serde(skip)]
    pub hooks: DrmHooks,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            eme_enabled: true,
            drm_systems: BTreeMap::new(),
            widevine_license_url: None,
            drm_system_options: DrmSystemOptions::default(),
            cert_load_policy: LoadPolicy::default(),
            key_load_policy: LoadPolicy {
                max_num_retry: 1,
                ..LoadPolicy::default()
            },
            strict: false,
            usable_in_future: UsableInFuturePolicy::default(),
            hooks: DrmHooks::default(),
        }
    }
}

impl DrmConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Add a key system with a license URL.
    pub fn with_license_url(mut self, key_system: KeySystem, url: impl Into<String>) -> Self {
        self.drm_systems.entry(key_system).or_default().license_url = Some(url.into());
        self
    }

    /// Add a server certificate URL for a key system.
    pub fn with_certificate_url(mut self, key_system: KeySystem, url: impl Into<String>) -> Self {
        self.drm_systems
            .entry(key_system)
            .or_default()
            .server_certificate_url = Some(url.into());
        self
    }

    /// Configured key systems, in attempt order.
    pub fn key_systems_for_config(&self) -> Vec<KeySystem> {
        KeySystem::ALL
            .into_iter()
            .filter(|ks| {
                self.drm_systems.contains_key(ks)
                    || (*ks == KeySystem::Widevine && self.widevine_license_url.is_some())
            })
            .collect()
    }

    pub fn license_url_for(&self, key_system: KeySystem) -> Option<&str> {
        if let Some(config) = self.drm_systems.get(&key_system) {
            return config.license_url.as_deref();
        }
        if key_system == KeySystem::Widevine {
            return self.widevine_license_url.as_deref();
        }
        None
    }

    pub fn server_certificate_url_for(&self, key_system: KeySystem) -> Option<&str> {
        self.drm_systems
            .get(&key_system)
            .and_then(|c| c.server_certificate_url.as_deref())
    }

    pub fn is_persistent_session(&self) -> bool {
        self.drm_system_options.is_persistent_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DrmConfig::default();
        assert!(config.eme_enabled);
        assert!(config.key_systems_for_config().is_empty());
        assert_eq!(config.usable_in_future, UsableInFuturePolicy::Wait);
    }

    #[test]
    fn test_key_systems_in_attempt_order() {
        let config = DrmConfig::default()
            .with_license_url(KeySystem::ClearKey, "https://ck")
            .with_license_url(KeySystem::FairPlay, "https://fp");
        assert_eq!(
            config.key_systems_for_config(),
            vec![KeySystem::FairPlay, KeySystem::ClearKey]
        );
    }

    #[test]
    fn test_legacy_widevine_url() {
        let config = DrmConfig {
            widevine_license_url: Some("https://wv".into()),
            ..Default::default()
        };
        assert_eq!(config.key_systems_for_config(), vec![KeySystem::Widevine]);
        assert_eq!(config.license_url_for(KeySystem::Widevine), Some("https://wv"));
        assert_eq!(config.license_url_for(KeySystem::PlayReady), None);
    }

    #[test]
    fn test_from_json() {
        let config = DrmConfig::from_json_str(
            r#"{
                "drm_systems": {
                    "com.apple.fps": {
                        "license_url": "https://fp/license",
                        "server_certificate_url": "https://fp/cert"
                    }
                },
                "drm_system_options": { "session_type": "persistent-license" },
                "key_load_policy": { "max_num_retry": 3 },
                "usable_in_future": "resolve"
            }"#,
        )
        .unwrap();

        assert_eq!(config.license_url_for(KeySystem::FairPlay), Some("https://fp/license"));
        assert_eq!(
            config.server_certificate_url_for(KeySystem::FairPlay),
            Some("https://fp/cert")
        );
        assert!(config.is_persistent_session());
        assert_eq!(config.key_load_policy.max_num_retry, 3);
        assert_eq!(config.key_load_policy.max_load_time_ms, 20_000);
        assert_eq!(config.usable_in_future, UsableInFuturePolicy::Resolve);
        assert!(config.eme_enabled);
    }

    #[test]
    fn test_unknown_key_system_rejected() {
        let result = DrmConfig::from_json_str(r#"{"drm_systems": {"com.example": {}}}"#);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drm.json");
        std::fs::write(
            &path,
            r#"{"drm_systems": {"com.widevine.alpha": {"license_url": "https://wv/license"}}}"#,
        )
        .unwrap();

        let config = DrmConfig::from_file(&path).unwrap();
        assert_eq!(config.key_systems_for_config(), vec![KeySystem::Widevine]);
        assert_eq!(config.license_url_for(KeySystem::Widevine), Some("https://wv/license"));
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = DrmConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
