//! # drmkeys testkit
//!
//! Testing utilities for drmkeys.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`TestHarness`], a controller wired to the in-memory host,
//!   certificate loader and scripted license server
//! - **Vectors**: builders for PSSH, `sinf` and PlayReady key message payloads
//! - **Generators**: Proptest strategies for key ids and descriptors
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use drmkeys_core::{KeyId, KeySystem};
//! use drmkeys_testkit::fixtures::{config_for, key_for, TestHarness};
//!
//! async fn example() {
//!     let harness = TestHarness::new(config_for(&[KeySystem::Widevine]));
//!     let key = key_for(KeySystem::Widevine, &KeyId::from([1; 16]));
//!     let session = harness.controller.load_key(key).await.unwrap();
//!     assert_eq!(harness.server.attempts(), 1);
//!     println!("{:?}", session.key_status());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use drmkeys_testkit::generators::key_id;
//!
//! proptest! {
//!     #[test]
//!     fn hex_round_trips(kid in key_id()) {
//!         prop_assert_eq!(KeyId::from_hex(&kid.to_hex()).unwrap(), kid);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{config_for, init_tracing, key_for, wait_until, TestHarness};
