//! # drmkeys license
//!
//! Network seams for key acquisition: the raw license transport, the generic
//! loader used for certificate fetches, and [`LicenseClient`], which runs one
//! license round trip with request shaping, retries and response transform.
//!
//! ## Key Types
//!
//! - [`LicenseTransport`] - Cancel-safe HTTP POST for license challenges
//! - [`CertificateLoader`] - Pluggable loader (single attempt for certificates)
//! - [`LicenseClient`] - Retry policy over a transport
//! - [`LoadPolicy`] - Retry count and per-attempt timeout
//!
//! ## Retry Policy
//!
//! - **200**: success, response transform applied
//! - **4xx**: fails immediately, regardless of remaining budget
//! - **anything else** (including transport errors and timeouts): retried
//!   until `max_num_retry` retries are spent, then fails fatally

pub mod client;
pub mod error;
pub mod loader;
pub mod transport;

pub use client::{
    LicenseClient, LicenseContext, LicenseHooks, LoadPolicy, RequestSetup, ResponseTransform,
};
pub use error::{LicenseError, LoaderError, Result};
pub use loader::{CertificateLoader, HttpLoader, LoaderConfig, LoaderContext, ResponseType};
pub use transport::{HttpLicenseTransport, LicenseRequest, LicenseResponse, LicenseTransport};
