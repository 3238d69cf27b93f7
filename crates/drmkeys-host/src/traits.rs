//! Host traits: the abstract interface to the platform's CDM.
//!
//! The host owns decryption, key storage and session state. This crate only
//! describes the calls the controller makes and the events it listens to, so
//! that the controller stays host-agnostic. Implementations include the
//! platform binding (outside this workspace) and [`crate::memory`] for tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use drmkeys_core::{KeySystem, MediaKeySystemConfiguration, MessageType, RawKeyStatus};

use crate::error::Result;

/// Process-unique identity of a CDM handle.
///
/// Used by the binder to decide whether a handle is already the active one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CdmId(u64);

impl CdmId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CdmId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CdmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cdm#{}", self.0)
    }
}

/// Identity of one event subscription on a native session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Event raised by a native session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The CDM produced a message for the license server.
    Message {
        message_type: MessageType,
        message: Bytes,
    },
    /// The session's key statuses changed; read them with
    /// [`NativeSession::key_statuses`].
    KeyStatusesChange,
}

/// A live event subscription. Dropping the receiver does not unsubscribe;
/// call [`NativeSession::unsubscribe`] on every exit path.
pub struct SessionSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Entry point: request access to a key system.
#[async_trait]
pub trait KeySystemAccessProvider: Send + Sync {
    /// Request access to `key_system` with the given candidate configurations.
    ///
    /// Fails with [`crate::HostError::NotSupported`] when no configuration is
    /// acceptable.
    async fn request_access(
        &self,
        key_system: KeySystem,
        configurations: &[MediaKeySystemConfiguration],
    ) -> Result<Arc<dyn KeySystemAccess>>;
}

/// Granted access to one key system.
#[async_trait]
pub trait KeySystemAccess: Send + Sync {
    fn key_system(&self) -> KeySystem;

    /// Create a CDM handle.
    async fn create_cdm(&self) -> Result<Arc<dyn Cdm>>;
}

/// A CDM handle, shared by every session of one key system.
#[async_trait]
pub trait Cdm: Send + Sync {
    fn id(&self) -> CdmId;

    fn key_system(&self) -> KeySystem;

    /// Provide a server certificate. Returns `false` when the host does not
    /// use certificates for this key system.
    async fn set_server_certificate(&self, certificate: Bytes) -> Result<bool>;

    /// Create a native session of the given session type.
    fn create_session(&self, session_type: &str) -> Result<Arc<dyn NativeSession>>;
}

/// A native key session.
#[async_trait]
pub trait NativeSession: Send + Sync {
    /// Host-assigned session id (may be empty before a request is generated).
    fn session_id(&self) -> String;

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Register for message and key-status events.
    fn subscribe(&self) -> SessionSubscription;

    /// Remove a subscription. No further events are delivered to it.
    fn unsubscribe(&self, id: SubscriptionId);

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn generate_request(&self, init_data_type: &str, init_data: Bytes) -> Result<()>;

    /// Hand a license response to the CDM.
    async fn update(&self, response: Bytes) -> Result<()>;

    /// Remove persisted license data.
    async fn remove(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Current `(key id, status)` entries, in host order and host shape.
    fn key_statuses(&self) -> Vec<RawKeyStatus>;
}

/// The media element a CDM handle is attached to.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Attach (`Some`) or detach (`None`) a CDM handle. The host forbids
    /// overlapping calls on one element.
    async fn set_media_keys(&self, cdm: Option<Arc<dyn Cdm>>) -> Result<()>;
}
