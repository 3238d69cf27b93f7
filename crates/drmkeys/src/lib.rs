//! # drmkeys
//!
//! Key-session lifecycle for an adaptive-streaming player: key-system
//! selection, CDM provisioning, license acquisition and renewal, and key
//! status tracking against a host-controlled CDM.
//!
//! ## Overview
//!
//! [`KeySystemController`] consumes player events (media attached, manifest
//! loaded, `encrypted`, destroying) and key load requests. For each key it:
//!
//! - **Negotiates** a key system, trying candidates strictly in order and
//!   creating one CDM handle per key system
//! - **Provisions** the server certificate while the handle is created
//! - **Binds** the handle to the media element through a FIFO queue
//! - **Runs the license protocol** on a native session until the key is usable
//!
//! Failures of a pending acquisition reject the caller. Failures with no
//! waiting caller (status changes, teardown) are published to an
//! [`ErrorSink`] as [`ErrorEvent`]s.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use drmkeys::{DrmConfig, EventBus, KeySystemController};
//! use drmkeys::core::{DecryptDescriptor, KeyId, KeySystem, KeySystemFormat};
//! use drmkeys::host::{MemoryHost, MemoryMediaElement};
//!
//! async fn example() {
//!     let config = DrmConfig::default()
//!         .with_license_url(KeySystem::Widevine, "https://license.example/wv");
//!     let bus = Arc::new(EventBus::default());
//!     let controller =
//!         KeySystemController::with_defaults(config, Arc::new(MemoryHost::new()), bus);
//!
//!     controller.on_media_attached(Arc::new(MemoryMediaElement::new()));
//!
//!     let key = DecryptDescriptor::new(KeySystemFormat::Widevine.as_str(), "data:")
//!         .with_key_id(KeyId::from_bytes(vec![0xaa; 16]));
//!     let session = controller.load_key(key).await.unwrap();
//!     println!("key status: {:?}", session.key_status());
//!
//!     controller.destroy().await;
//! }
//! ```
//!
//! ## Design Notes
//!
//! - One acquisition per key id: concurrent loads of one key share a task
//! - Exactly one `setMediaKeys` call is in flight per controller; a
//!   process-wide [`CdmCleanupBarrier`] extends that across controllers
//! - Removing a session unsubscribes from host events and aborts its license
//!   request before the native session is closed
//!
//! ## Re-exports
//!
//! - `drmkeys::core` - Key systems, descriptors, init data, error taxonomy
//! - `drmkeys::host` - Host CDM traits and the in-memory host
//! - `drmkeys::license` - License transport, loader and retry client

pub mod barrier;
pub mod binder;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod negotiator;
pub mod protocol;
pub mod provisioner;
pub mod registry;
pub mod reporter;
pub mod session;
pub mod task;

// Re-export component crates
pub use drmkeys_core as core;
pub use drmkeys_host as host;
pub use drmkeys_license as license;

pub use barrier::CdmCleanupBarrier;
pub use binder::MediaKeysBinder;
pub use config::{DrmConfig, DrmHooks, GenerateRequestFilter, KeySystemConfig, UsableInFuturePolicy};
pub use controller::{ControllerDeps, EncryptedOutcome, KeySystemController};
pub use error::{ConfigError, ErrorKind, KeySystemError, Result};
pub use events::{ErrorEvent, ErrorLog, ErrorSink, EventBus, LevelCodecs, PlayerEvent};
pub use negotiator::KeySystemNegotiator;
pub use protocol::{GenerateReason, REMOVE_SESSION_TIMEOUT};
pub use provisioner::CertificateProvisioner;
pub use registry::{SessionRegistry, SessionTask};
pub use reporter::ErrorReporter;
pub use session::{KeySessionContext, ProtocolState};
pub use task::SharedTask;
