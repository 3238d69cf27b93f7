//! Server certificate provisioning.

use std::sync::Arc;

use bytes::Bytes;

use drmkeys_core::{ErrorKind, KeySystem, KeySystemError};
use drmkeys_host::Cdm;
use drmkeys_license::{CertificateLoader, LoaderConfig, LoaderContext};

use crate::config::DrmConfig;
use crate::error::Result;

/// Fetches the configured server certificate and hands it to a CDM.
#[derive(Clone)]
pub struct CertificateProvisioner {
    loader: Arc<dyn CertificateLoader>,
    config: Arc<DrmConfig>,
}

impl CertificateProvisioner {
    pub fn new(loader: Arc<dyn CertificateLoader>, config: Arc<DrmConfig>) -> Self {
        Self { loader, config }
    }

    /// Load the certificate for `key_system`.
    ///
    /// Returns `None` without loading when no certificate URL is configured.
    /// A single attempt is made, bounded by the certificate load policy.
    pub async fn fetch(&self, key_system: KeySystem) -> Result<Option<Bytes>> {
        let Some(url) = self.config.server_certificate_url_for(key_system) else {
            return Ok(None);
        };

        let timeout = self.config.cert_load_policy.max_load_time();
        tracing::debug!("fetching server certificate for {} from {}", key_system, url);
        self.loader
            .load(
                LoaderContext::binary(url),
                LoaderConfig::single_attempt(timeout),
            )
            .await
            .map(Some)
            .map_err(|e| {
                KeySystemError::new(
                    ErrorKind::CertificateRequestFailed,
                    format!("failed to load server certificate from {url}: {e}"),
                )
            })
    }

    /// Hand `certificate` to `cdm`.
    pub async fn apply(
        &self,
        cdm: &Arc<dyn Cdm>,
        key_system: KeySystem,
        certificate: Bytes,
    ) -> Result<()> {
        match cdm.set_server_certificate(certificate).await {
            Ok(true) => {
                tracing::debug!("server certificate set on {} for {}", cdm.id(), key_system);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!("server certificates not supported by {}", key_system);
                Ok(())
            }
            Err(e) => Err(KeySystemError::new(
                ErrorKind::CertificateUpdateFailed,
                format!("server certificate rejected by {key_system}: {e}"),
            )),
        }
    }

    /// Fetch then apply. Used when the CDM already exists.
    pub async fn provision(&self, cdm: Arc<dyn Cdm>, key_system: KeySystem) -> Result<Arc<dyn Cdm>> {
        if let Some(certificate) = self.fetch(key_system).await? {
            self.apply(&cdm, key_system, certificate).await?;
        }
        Ok(cdm)
    }
}
