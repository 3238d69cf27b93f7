//! Key-system negotiation.
//!
//! Candidates are tried in order. For each one the negotiator requests access,
//! then creates the CDM handle while the server certificate loads, and finally
//! hands the certificate to the CDM. One acquisition runs per key system for
//! the controller's lifetime: concurrent and later callers share it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

use drmkeys_core::{
    supported_configurations, CodecSet, DrmSystemOptions, ErrorKind, KeySystem, KeySystemError,
    KeySystemFormat, MediaKeySystemConfiguration,
};
use drmkeys_host::{Cdm, KeySystemAccessProvider};

use crate::error::Result;
use crate::provisioner::CertificateProvisioner;

/// Failure of one candidate.
#[derive(Clone, Debug)]
enum NegotiationError {
    /// Access was refused; the next candidate may still work.
    Access(String),
    /// Access was granted but a later step failed.
    Classified(KeySystemError),
}

type CdmTask = Shared<BoxFuture<'static, std::result::Result<Arc<dyn Cdm>, NegotiationError>>>;

#[derive(Default)]
struct NegotiatorState {
    memo: HashMap<KeySystem, CdmTask>,
    /// Key systems whose CDM handle was created, in creation order.
    created: Vec<KeySystem>,
    /// Key systems access was requested for, in request order.
    requested: Vec<KeySystem>,
}

pub struct KeySystemNegotiator {
    access: Arc<dyn KeySystemAccessProvider>,
    provisioner: CertificateProvisioner,
    options: DrmSystemOptions,
    state: Mutex<NegotiatorState>,
}

impl KeySystemNegotiator {
    pub fn new(
        access: Arc<dyn KeySystemAccessProvider>,
        provisioner: CertificateProvisioner,
        options: DrmSystemOptions,
    ) -> Self {
        Self {
            access,
            provisioner,
            options,
            state: Mutex::new(NegotiatorState::default()),
        }
    }

    /// Obtain a CDM handle for the first candidate that works.
    ///
    /// When every candidate fails, the last failure is returned: classified
    /// failures as they are, refused access as a fatal `NoAccess`.
    pub async fn negotiate(
        &self,
        candidates: &[KeySystem],
        codecs: &CodecSet,
    ) -> Result<(KeySystem, Arc<dyn Cdm>)> {
        let mut last_error = None;
        for key_system in candidates {
            match self.acquire(*key_system, codecs).await {
                Ok(cdm) => return Ok((*key_system, cdm)),
                Err(e) => {
                    tracing::debug!("key system {} unavailable: {:?}", key_system, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(NegotiationError::Classified(e)) => e,
            Some(NegotiationError::Access(message)) => {
                KeySystemError::new(ErrorKind::NoAccess, message)
            }
            None => KeySystemError::new(
                ErrorKind::NoAccess,
                "no key system candidates to request access for",
            ),
        })
    }

    /// Formats of every key system whose CDM handle was created.
    pub fn selected_key_system_formats(&self) -> Vec<KeySystemFormat> {
        let state = self.state.lock().unwrap();
        state.created.iter().map(KeySystem::format).collect()
    }

    /// Key systems access was requested for, in request order.
    pub fn requested_key_systems(&self) -> Vec<KeySystem> {
        self.state.lock().unwrap().requested.clone()
    }

    async fn acquire(
        &self,
        key_system: KeySystem,
        codecs: &CodecSet,
    ) -> std::result::Result<Arc<dyn Cdm>, NegotiationError> {
        let task = {
            let mut state = self.state.lock().unwrap();
            match state.memo.get(&key_system) {
                Some(task) => task.clone(),
                None => {
                    if !state.requested.contains(&key_system) {
                        state.requested.push(key_system);
                    }
                    let configurations = supported_configurations(key_system, codecs, &self.options);
                    let task = acquire_cdm(
                        self.access.clone(),
                        self.provisioner.clone(),
                        key_system,
                        configurations,
                    )
                    .boxed()
                    .shared();
                    state.memo.insert(key_system, task.clone());
                    task
                }
            }
        };

        let result = task.clone().await;

        let mut state = self.state.lock().unwrap();
        match &result {
            Ok(_) => {
                if !state.created.contains(&key_system) {
                    state.created.push(key_system);
                }
            }
            Err(_) => {
                // Evict so a later attempt starts over.
                if state.memo.get(&key_system).is_some_and(|t| t.ptr_eq(&task)) {
                    state.memo.remove(&key_system);
                }
            }
        }
        result
    }
}

async fn acquire_cdm(
    access: Arc<dyn KeySystemAccessProvider>,
    provisioner: CertificateProvisioner,
    key_system: KeySystem,
    configurations: Vec<MediaKeySystemConfiguration>,
) -> std::result::Result<Arc<dyn Cdm>, NegotiationError> {
    let access = access
        .request_access(key_system, &configurations)
        .await
        .map_err(|e| {
            NegotiationError::Access(format!("access to {key_system} not granted: {e}"))
        })?;

    let (cdm, certificate) = tokio::join!(access.create_cdm(), provisioner.fetch(key_system));
    let cdm = cdm.map_err(|e| {
        NegotiationError::Classified(KeySystemError::new(
            ErrorKind::NoKeys,
            format!("failed to create media keys for {key_system}: {e}"),
        ))
    })?;
    tracing::debug!("created {} for {}", cdm.id(), key_system);

    if let Some(certificate) = certificate.map_err(NegotiationError::Classified)? {
        provisioner
            .apply(&cdm, key_system, certificate)
            .await
            .map_err(NegotiationError::Classified)?;
    }
    Ok(cdm)
}
