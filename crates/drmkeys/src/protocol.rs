//! Per-session license protocol.
//!
//! A session generates a request, answers the CDM's messages with license
//! round trips and tracks key statuses until it is removed. The pending
//! `generate_request` and the key-status wait share one outcome channel on
//! the context: whichever side fails first decides the outcome, and the
//! channel is dropped as soon as either side settles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use drmkeys_core::{ErrorKind, KeyStatus, KeySystem, KeySystemError, MessageType};
use drmkeys_host::{Cdm, SessionEvent, SessionSubscription};
use drmkeys_license::LicenseContext;

use crate::config::UsableInFuturePolicy;
use crate::controller::ControllerInner;
use crate::error::Result;
use crate::session::{KeySessionContext, ProtocolState};
use crate::task::spawn_shared;

/// Bound on the persistent-license `remove()` call during teardown.
pub const REMOVE_SESSION_TIMEOUT: Duration = Duration::from_secs(8);

/// Why a request is being generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerateReason {
    PlaylistKey,
    EncryptedEventKeyMatch,
    Expired,
}

impl GenerateReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GenerateReason::PlaylistKey => "playlist-key",
            GenerateReason::EncryptedEventKeyMatch => "encrypted-event-key-match",
            GenerateReason::Expired => "expired",
        }
    }
}

impl fmt::Display for GenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ControllerInner {
    /// Create a native session for `descriptor` on `cdm` and register it.
    pub(crate) fn create_key_session_context(
        &self,
        key_system: KeySystem,
        cdm: Arc<dyn Cdm>,
        descriptor: drmkeys_core::DecryptDescriptor,
    ) -> Result<Arc<KeySessionContext>> {
        let session_type = self.config.drm_system_options.preferred_session_type();
        let native = cdm.create_session(session_type).map_err(|e| {
            KeySystemError::new(
                ErrorKind::NoSession,
                format!("failed to create {key_system} key session: {e}"),
            )
        })?;
        tracing::debug!(
            "created {} key session {} for {}",
            key_system,
            native.session_id(),
            descriptor.details()
        );
        let context = KeySessionContext::new(key_system, cdm, native, descriptor);
        self.registry.add_context(context.clone());
        Ok(context)
    }

    /// Generate a license request on `context` and wait until its key is
    /// usable.
    ///
    /// Without init data the request is skipped and the context is returned
    /// as is. On failure the session is removed.
    pub(crate) async fn generate_request_with_preferred_session(
        &self,
        context: Arc<KeySessionContext>,
        init_data_type: &str,
        init_data: Option<Bytes>,
        reason: GenerateReason,
    ) -> Result<Arc<KeySessionContext>> {
        let (init_data_type, init_data) =
            match self.filter_init_data(&context, init_data_type, init_data) {
                Ok(filtered) => filtered,
                Err(err) => {
                    self.remove_session(&context).await;
                    return Err(err);
                }
            };

        let Some(init_data) = init_data else {
            tracing::debug!(
                "skipping key session request for {}: no init data",
                context.descriptor().details()
            );
            return Ok(context);
        };

        match self.generate_request(&context, &init_data_type, init_data, reason).await {
            Ok(()) => Ok(context),
            Err(err) => {
                tracing::debug!("key session request failed ({}): {}", reason, err);
                self.remove_session(&context).await;
                Err(err)
            }
        }
    }

    fn filter_init_data(
        &self,
        context: &KeySessionContext,
        init_data_type: &str,
        init_data: Option<Bytes>,
    ) -> Result<(String, Option<Bytes>)> {
        let Some(filter) = self.config.hooks.generate_request.get(&context.key_system()) else {
            return Ok((init_data_type.to_string(), init_data));
        };
        match filter(init_data_type, init_data.as_ref(), &context.descriptor()) {
            Ok((init_data_type, init_data)) => {
                // Later renewals start from what the filter produced.
                context.update_descriptor(|d| d.pssh = init_data.clone());
                Ok((init_data_type, init_data))
            }
            Err(e) if self.config.strict => Err(KeySystemError::new(
                ErrorKind::NoSession,
                format!("generate request filter failed: {e}"),
            )
            .with_fatal(true)),
            Err(e) => {
                tracing::warn!("generate request filter failed, ignoring it: {}", e);
                Ok((init_data_type.to_string(), init_data))
            }
        }
    }

    async fn generate_request(
        &self,
        context: &Arc<KeySessionContext>,
        init_data_type: &str,
        init_data: Bytes,
        reason: GenerateReason,
    ) -> Result<()> {
        if self.is_destroyed() {
            return Err(KeySystemError::invalid_state("controller destroyed"));
        }

        let mut waiter = context.attach_waiter();
        self.start_event_pump(context);

        tracing::debug!(
            "generating key session request for {} ({})",
            context.descriptor().details(),
            reason
        );
        let native = context.native().clone();
        let generate = native.generate_request(init_data_type, init_data);
        tokio::pin!(generate);

        let mut generated = false;
        let mut usable = false;
        let outcome = loop {
            tokio::select! {
                result = &mut generate, if !generated => match result {
                    Ok(()) => {
                        generated = true;
                        context.set_state(ProtocolState::RequestGenerated);
                        if usable {
                            break Ok(());
                        }
                        context.set_state(ProtocolState::AwaitingMessage);
                    }
                    Err(e) => {
                        break Err(KeySystemError::new(
                            ErrorKind::NoSession,
                            format!("error generating key session request: {e}"),
                        ));
                    }
                },
                outcome = waiter.recv() => match outcome {
                    Some(Ok(())) => {
                        usable = true;
                        if generated {
                            break Ok(());
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => {
                        break Err(KeySystemError::invalid_state(
                            "key session removed before its key became usable",
                        ));
                    }
                },
            }
        };

        context.detach_waiter();
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host events
    // ─────────────────────────────────────────────────────────────────────────

    fn start_event_pump(&self, context: &Arc<KeySessionContext>) {
        if context.has_pump() {
            return;
        }
        let SessionSubscription { id, mut events } = context.native().subscribe();
        let controller = self.weak.clone();
        let weak_context = Arc::downgrade(context);

        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let (Some(inner), Some(context)) = (controller.upgrade(), weak_context.upgrade())
                else {
                    break;
                };
                if context.is_removed() {
                    break;
                }
                match event {
                    SessionEvent::Message {
                        message_type,
                        message,
                    } => inner.on_session_message(&context, message_type, message),
                    SessionEvent::KeyStatusesChange => inner.on_key_statuses_change(&context),
                }
            }
        });
        context.set_pump(id, pump.abort_handle());
    }

    fn on_session_message(
        &self,
        context: &Arc<KeySessionContext>,
        message_type: MessageType,
        message: Bytes,
    ) {
        match message_type {
            MessageType::LicenseRequest | MessageType::LicenseRenewal => {
                self.spawn_license_request(context, message_type, message);
            }
            MessageType::LicenseRelease if context.key_system() == KeySystem::FairPlay => {
                let controller = self.weak.clone();
                let context = context.clone();
                tokio::spawn(async move {
                    let Some(inner) = controller.upgrade() else {
                        return;
                    };
                    if let Err(e) = context
                        .native()
                        .update(Bytes::from_static(b"acknowledged"))
                        .await
                    {
                        tracing::warn!("failed to acknowledge license release: {}", e);
                    }
                    inner.remove_session(&context).await;
                });
            }
            other => {
                tracing::warn!(
                    "ignoring {} message for {} key session {}",
                    other,
                    context.key_system(),
                    context.session_id()
                );
            }
        }
    }

    fn spawn_license_request(
        &self,
        context: &Arc<KeySessionContext>,
        message_type: MessageType,
        challenge: Bytes,
    ) {
        context.set_state(ProtocolState::LicenseRequested);
        let controller = self.weak.clone();
        let task_context = context.clone();
        let handle = tokio::spawn(async move {
            let Some(inner) = controller.upgrade() else {
                return;
            };
            if let Err(err) = inner
                .request_license(&task_context, message_type, challenge)
                .await
            {
                inner.route_error(&task_context, err);
            }
        });
        context.replace_license_task(handle.abort_handle());
    }

    async fn request_license(
        &self,
        context: &Arc<KeySessionContext>,
        message_type: MessageType,
        challenge: Bytes,
    ) -> Result<()> {
        let key_system = context.key_system();
        let url = self
            .config
            .license_url_for(key_system)
            .ok_or_else(|| {
                KeySystemError::new(
                    ErrorKind::LicenseRequestFailed,
                    format!("no license server URL configured for {key_system}"),
                )
            })?
            .to_string();

        let license_context = LicenseContext {
            key_system,
            key_id: context.descriptor().key_id_hex(),
            session_id: context.session_id(),
            message_type,
        };
        let license = self.license.request(&license_context, &url, challenge).await?;

        tracing::debug!(
            "updating {} key session {} with {} byte license",
            key_system,
            context.session_id(),
            license.len()
        );
        context.native().update(license).await.map_err(|e| {
            KeySystemError::new(
                ErrorKind::SessionUpdateFailed,
                format!("failed to update key session: {e}"),
            )
        })
    }

    fn on_key_statuses_change(&self, context: &Arc<KeySessionContext>) {
        let mut latest = None;
        for entry in context.native().key_statuses() {
            match entry.normalize() {
                Some((_, status)) => latest = Some(status),
                None => tracing::debug!("ignoring unrecognized key status entry {:?}", entry),
            }
        }
        let Some(status) = latest else {
            return;
        };

        context.set_key_status(status);
        tracing::debug!(
            "key status of {} key session {} is {}",
            context.key_system(),
            context.session_id(),
            status
        );

        let outcome = match status {
            KeyStatus::Usable => {
                context.set_state(ProtocolState::Usable);
                Ok(())
            }
            KeyStatus::UsableInFuture => match self.config.usable_in_future {
                UsableInFuturePolicy::Resolve => {
                    context.set_state(ProtocolState::Usable);
                    Ok(())
                }
                UsableInFuturePolicy::Wait => return,
            },
            KeyStatus::OutputRestricted => {
                context.set_state(ProtocolState::OutputRestricted);
                Err(KeySystemError::new(
                    ErrorKind::StatusOutputRestricted,
                    "HDCP level output restricted",
                ))
            }
            KeyStatus::InternalError => {
                context.set_state(ProtocolState::InternalError);
                Err(KeySystemError::new(
                    ErrorKind::StatusInternalError,
                    format!("key status changed to {status}"),
                ))
            }
            KeyStatus::Expired => {
                context.set_state(ProtocolState::Expired);
                if context.begin_renewal() {
                    self.renew_key_session(context);
                }
                // Only a pending request hears about expiry; renewal covers
                // playback.
                let err = KeySystemError::new(ErrorKind::NoKeys, "key expired while generating request");
                let _ = context.notify_waiter(Err(err));
                return;
            }
            other => {
                tracing::warn!("unhandled key status {}", other);
                return;
            }
        };

        match outcome {
            Ok(()) => {
                let _ = context.notify_waiter(Ok(()));
            }
            Err(err) => self.route_error(context, err),
        }
    }

    /// Hand `err` to the pending request, or to the event bus when nothing is
    /// waiting.
    fn route_error(&self, context: &KeySessionContext, err: KeySystemError) {
        if let Some(Err(err)) = context.notify_waiter(Err(err)) {
            self.reporter.report(&err);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Renewal and removal
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace an expired session with a fresh one generated from the same
    /// PSSH, then remove the expired one.
    fn renew_key_session(&self, context: &Arc<KeySessionContext>) {
        let controller = self.weak.clone();
        let expired = context.clone();
        tokio::spawn(async move {
            let Some(inner) = controller.upgrade() else {
                return;
            };
            if inner.is_destroyed() {
                return;
            }
            let descriptor = expired.descriptor();
            if let (Some(pssh), Some(key_id_hex)) = (descriptor.pssh.clone(), descriptor.key_id_hex()) {
                tracing::debug!("renewing expired key session for {}", descriptor.details());
                match inner.create_key_session_context(
                    expired.key_system(),
                    expired.cdm().clone(),
                    descriptor,
                ) {
                    Ok(renewed) => {
                        let generator = inner.clone();
                        let task = spawn_shared(async move {
                            generator
                                .generate_request_with_preferred_session(
                                    renewed,
                                    "cenc",
                                    Some(pssh),
                                    GenerateReason::Expired,
                                )
                                .await
                        });
                        inner.registry.insert_task(key_id_hex, task.clone());
                        let watcher = inner.weak.clone();
                        tokio::spawn(async move {
                            let Err(err) = task.await else {
                                return;
                            };
                            // Teardown cancels renewals silently.
                            if let Some(inner) = watcher.upgrade().filter(|i| !i.is_destroyed()) {
                                inner.reporter.report(&err);
                            }
                        });
                    }
                    Err(err) => inner.reporter.report(&err),
                }
            } else {
                tracing::warn!(
                    "cannot renew expired key session for {}: no PSSH",
                    descriptor.details()
                );
            }
            inner.remove_session(&expired).await;
        });
    }

    /// Tear a session down: stop its events and license work, then remove
    /// (persistent sessions only) and close the native session. Failures are
    /// reported, never returned. Runs once per context.
    pub(crate) async fn remove_session(&self, context: &Arc<KeySessionContext>) {
        if !context.mark_removed() {
            return;
        }
        context.stop_background();
        context.detach_waiter();
        self.registry.remove_context(context);
        self.registry.remove_entries_for(context);

        let session_id = context.session_id();
        tracing::debug!("removing {} key session {}", context.key_system(), session_id);

        if self.config.is_persistent_session() {
            match tokio::time::timeout(REMOVE_SESSION_TIMEOUT, context.native().remove()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.reporter.report_kind(
                    ErrorKind::DestroyRemoveSessionError,
                    format!("could not remove key session {session_id}: {e}"),
                ),
                Err(_) => self.reporter.report_kind(
                    ErrorKind::DestroyRemoveSessionError,
                    format!("timed out removing key session {session_id}"),
                ),
            }
        }

        if let Err(e) = context.native().close().await {
            self.reporter.report_kind(
                ErrorKind::DestroyCloseSessionError,
                format!("could not close key session {session_id}: {e}"),
            );
        }
        context.set_state(ProtocolState::Closed);
    }
}
