//! # drmkeys core
//!
//! Pure primitives for content-protection key management: key systems, key
//! identifiers, decrypt descriptors, key statuses, and init data parsing.
//!
//! This crate performs no I/O and holds no state. Everything that talks to a
//! host CDM or to a license server lives in the crates built on top of it.
//!
//! ## Key Types
//!
//! - [`KeySystem`] - Closed set of negotiable key systems
//! - [`KeySystemFormat`] - Playlist key format selecting a key system
//! - [`KeyId`] - Raw key identifier, keyed by lowercase hex
//! - [`DecryptDescriptor`] - Identity of one decryption key
//! - [`KeyStatus`] - Usability of a key as reported by the host
//! - [`KeySystemError`] - Classified failure with a fatal flag
//!
//! ## Init Data
//!
//! `cenc` init data is walked as a sequence of `pssh` boxes; `sinf` init data
//! is a JSON-wrapped `sinf` structure whose `tenc` box yields the key id. See
//! [`init_data`].

pub mod configuration;
pub mod descriptor;
pub mod error;
pub mod init_data;
pub mod playready;
pub mod status;
pub mod types;

pub use configuration::{
    supported_configurations, CodecSet, DrmSystemOptions, MediaCapability,
    MediaKeySystemConfiguration, PERSISTENT_LICENSE,
};
pub use descriptor::DecryptDescriptor;
pub use error::{ErrorKind, InitDataError, KeySystemError, Result};
pub use init_data::{key_id_from_sinf_json, parse_sinf, PsshBox, SystemId};
pub use playready::{unwrap_key_message, UnwrappedChallenge};
pub use status::{HostValue, KeyStatus, MessageType, RawKeyStatus};
pub use types::{KeyId, KeySystem, KeySystemFormat};
