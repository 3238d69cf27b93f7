//! # drmkeys host
//!
//! The seam between the key-session controller and the platform's content
//! decryption module. Provides async traits for every host call the
//! controller makes, plus a scripted in-memory host for tests.
//!
//! ## Key Types
//!
//! - [`KeySystemAccessProvider`] - Request access to a key system
//! - [`KeySystemAccess`] - Granted access; creates CDM handles
//! - [`Cdm`] - A CDM handle shared by sessions of one key system
//! - [`NativeSession`] - One native key session with explicit subscribe/unsubscribe
//! - [`MediaElement`] - Where a CDM handle is attached
//! - [`MemoryHost`] / [`MemoryMediaElement`] - In-memory host for tests
//!
//! ## Design Notes
//!
//! - **Explicit listeners**: session events are delivered over channels
//!   obtained from [`NativeSession::subscribe`]; owners must unsubscribe on
//!   every exit path.
//! - **Opaque state**: the host is the source of truth for key statuses; the
//!   controller only observes.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{HostError, Result};
pub use memory::{HostScript, MemoryHost, MemoryMediaElement, MemorySession};
pub use traits::{
    Cdm, CdmId, KeySystemAccess, KeySystemAccessProvider, MediaElement, NativeSession,
    SessionEvent, SessionSubscription, SubscriptionId,
};
