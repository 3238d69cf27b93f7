//! Player events consumed by the controller and error events it produces.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::broadcast;

use drmkeys_core::{DecryptDescriptor, ErrorKind, KeySystemError};
use drmkeys_host::MediaElement;

/// Category carried by every error event raised here.
pub const KEY_SYSTEM_ERROR: &str = "key-system";

/// Codecs declared by one variant of the manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelCodecs {
    pub audio: Option<String>,
    pub video: Option<String>,
}

/// Events the controller reacts to.
#[derive(Clone)]
pub enum PlayerEvent {
    MediaAttached(Arc<dyn MediaElement>),
    MediaDetached,
    ManifestLoading,
    ManifestLoaded {
        session_keys: Vec<DecryptDescriptor>,
        levels: Vec<LevelCodecs>,
    },
    /// The media element raised `encrypted`.
    Encrypted {
        init_data_type: String,
        init_data: Option<Bytes>,
    },
    WaitingForKey,
    Destroying,
}

impl std::fmt::Debug for PlayerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerEvent::MediaAttached(_) => f.write_str("MediaAttached"),
            PlayerEvent::MediaDetached => f.write_str("MediaDetached"),
            PlayerEvent::ManifestLoading => f.write_str("ManifestLoading"),
            PlayerEvent::ManifestLoaded {
                session_keys,
                levels,
            } => f
                .debug_struct("ManifestLoaded")
                .field("session_keys", &session_keys.len())
                .field("levels", &levels.len())
                .finish(),
            PlayerEvent::Encrypted { init_data_type, .. } => f
                .debug_struct("Encrypted")
                .field("init_data_type", init_data_type)
                .finish(),
            PlayerEvent::WaitingForKey => f.write_str("WaitingForKey"),
            PlayerEvent::Destroying => f.write_str("Destroying"),
        }
    }
}

/// A structured error published for failures with no waiting caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    pub category: &'static str,
    pub kind: ErrorKind,
    pub fatal: bool,
    pub cause: KeySystemError,
}

impl From<&KeySystemError> for ErrorEvent {
    fn from(err: &KeySystemError) -> Self {
        Self {
            category: KEY_SYSTEM_ERROR,
            kind: err.kind,
            fatal: err.fatal,
            cause: err.clone(),
        }
    }
}

/// Receives error events.
pub trait ErrorSink: Send + Sync {
    fn emit(&self, event: ErrorEvent);
}

/// Broadcast event bus for error events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ErrorSink for EventBus {
    fn emit(&self, event: ErrorEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct ErrorLog {
    events: Mutex<Vec<ErrorEvent>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl ErrorSink for ErrorLog {
    fn emit(&self, event: ErrorEvent) {
        self.events.lock().unwrap().push(event);
    }
}
