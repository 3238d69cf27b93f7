//! Supported-configuration construction for key-system access requests.

use serde::{Deserialize, Serialize};

use crate::types::KeySystem;

/// Video codec advertised when the manifest declares none; the host rejects
/// configurations with empty capability lists.
pub const DEFAULT_VIDEO_CODEC: &str = "avc1.42e01e";

/// Session type requesting a persistent license.
pub const PERSISTENT_LICENSE: &str = "persistent-license";

/// Options shaping the configuration offered to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrmSystemOptions {
    pub audio_robustness: Option<String>,
    pub video_robustness: Option<String>,
    pub audio_encryption_scheme: Option<String>,
    pub video_encryption_scheme: Option<String>,
    pub persistent_state: Option<String>,
    pub distinctive_identifier: Option<String>,
    pub session_type: Option<String>,
    pub session_types: Option<Vec<String>>,
}

impl DrmSystemOptions {
    /// Whether sessions are created for persistent licenses, which changes the
    /// teardown path (sessions must be removed before closing).
    pub fn is_persistent_session(&self) -> bool {
        self.session_type.as_deref() == Some(PERSISTENT_LICENSE)
            || self
                .session_types
                .as_ref()
                .is_some_and(|types| types.iter().any(|t| t == PERSISTENT_LICENSE))
    }

    /// Session type used when creating native sessions.
    pub fn preferred_session_type(&self) -> &str {
        self.session_type.as_deref().unwrap_or("temporary")
    }
}

/// One audio or video capability entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCapability {
    pub content_type: String,
    pub robustness: String,
    pub encryption_scheme: Option<String>,
}

/// The configuration offered to the host when requesting key-system access.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaKeySystemConfiguration {
    pub init_data_types: Vec<String>,
    pub persistent_state: String,
    pub distinctive_identifier: String,
    pub session_types: Vec<String>,
    pub audio_capabilities: Vec<MediaCapability>,
    pub video_capabilities: Vec<MediaCapability>,
}

/// Distinct audio/video codec strings in use by the current manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodecSet {
    pub audio: Vec<String>,
    pub video: Vec<String>,
}

impl CodecSet {
    /// Collect distinct codecs from `(audio, video)` pairs of every variant,
    /// keeping first-seen order.
    pub fn from_levels<'a, I>(levels: I) -> Self
    where
        I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
    {
        let mut set = CodecSet::default();
        for (audio, video) in levels {
            push_unique(&mut set.audio, audio);
            push_unique(&mut set.video, video);
        }
        set
    }

    /// The codec set to advertise, substituting the default video codec when
    /// nothing is known.
    pub fn or_default_video(&self) -> Self {
        let mut set = self.clone();
        if set.audio.is_empty() && set.video.is_empty() {
            set.video.push(DEFAULT_VIDEO_CODEC.to_string());
        }
        set
    }
}

fn push_unique(list: &mut Vec<String>, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        if !list.iter().any(|existing| existing == v) {
            list.push(v.to_string());
        }
    }
}

/// Build the configurations offered for `key_system`.
pub fn supported_configurations(
    key_system: KeySystem,
    codecs: &CodecSet,
    options: &DrmSystemOptions,
) -> Vec<MediaKeySystemConfiguration> {
    let codecs = codecs.or_default_video();
    let capability = |kind: &str, codec: &String, robustness: &Option<String>, scheme: &Option<String>| {
        MediaCapability {
            content_type: format!("{}/mp4; codecs={}", kind, codec),
            robustness: robustness.clone().unwrap_or_default(),
            encryption_scheme: scheme.clone(),
        }
    };

    let session_types = match (&options.session_types, &options.session_type) {
        (Some(types), _) => types.clone(),
        (None, Some(t)) => vec![t.clone()],
        (None, None) => vec!["temporary".to_string()],
    };

    vec![MediaKeySystemConfiguration {
        init_data_types: key_system
            .init_data_types()
            .iter()
            .map(|t| t.to_string())
            .collect(),
        persistent_state: options
            .persistent_state
            .clone()
            .unwrap_or_else(|| "optional".to_string()),
        distinctive_identifier: options
            .distinctive_identifier
            .clone()
            .unwrap_or_else(|| "optional".to_string()),
        session_types,
        audio_capabilities: codecs
            .audio
            .iter()
            .map(|c| {
                capability(
                    "audio",
                    c,
                    &options.audio_robustness,
                    &options.audio_encryption_scheme,
                )
            })
            .collect(),
        video_capabilities: codecs
            .video
            .iter()
            .map(|c| {
                capability(
                    "video",
                    c,
                    &options.video_robustness,
                    &options.video_encryption_scheme,
                )
            })
            .collect(),
    }]
}
