//! The key-system controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use futures::future::{join_all, FutureExt};

use drmkeys_core::{
    key_id_from_sinf_json, CodecSet, DecryptDescriptor, ErrorKind, KeySystem, KeySystemError,
    KeySystemFormat,
};
use drmkeys_host::{Cdm, KeySystemAccessProvider, MediaElement};
use drmkeys_license::{
    CertificateLoader, HttpLicenseTransport, HttpLoader, LicenseClient, LicenseTransport,
};

use crate::barrier::CdmCleanupBarrier;
use crate::binder::MediaKeysBinder;
use crate::config::DrmConfig;
use crate::error::Result;
use crate::events::{ErrorSink, LevelCodecs, PlayerEvent};
use crate::negotiator::KeySystemNegotiator;
use crate::protocol::GenerateReason;
use crate::provisioner::CertificateProvisioner;
use crate::registry::SessionRegistry;
use crate::reporter::ErrorReporter;
use crate::session::KeySessionContext;
use crate::task::{spawn_shared, SharedTask};

/// External collaborators of a controller.
#[derive(Clone)]
pub struct ControllerDeps {
    pub access: Arc<dyn KeySystemAccessProvider>,
    pub certificate_loader: Arc<dyn CertificateLoader>,
    pub license_transport: Arc<dyn LicenseTransport>,
    pub errors: Arc<dyn ErrorSink>,
    /// Teardown barrier shared with earlier controllers.
    pub barrier: Arc<CdmCleanupBarrier>,
}

/// What an `encrypted` event led to.
#[derive(Clone, Debug)]
pub enum EncryptedOutcome {
    /// Not init data this controller handles.
    Ignored,
    /// An existing session already covers the key.
    Reused(Arc<KeySessionContext>),
    /// A session created from playlist metadata received the init data and
    /// is generating its request.
    Generated(Arc<KeySessionContext>),
    /// The key id is unknown; an error event was published.
    Unmatched,
}

pub(crate) struct ControllerInner {
    pub(crate) config: Arc<DrmConfig>,
    pub(crate) negotiator: KeySystemNegotiator,
    pub(crate) binder: MediaKeysBinder,
    pub(crate) registry: SessionRegistry,
    pub(crate) license: LicenseClient,
    pub(crate) reporter: ErrorReporter,
    pub(crate) barrier: Arc<CdmCleanupBarrier>,
    codecs: Mutex<CodecSet>,
    key_format: Mutex<Option<SharedTask<KeySystemFormat>>>,
    destroyed: AtomicBool,
    pub(crate) weak: Weak<ControllerInner>,
}

/// Drives key-system selection and key sessions for one player instance.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct KeySystemController {
    inner: Arc<ControllerInner>,
}

impl KeySystemController {
    pub fn new(config: DrmConfig, deps: ControllerDeps) -> Self {
        let config = Arc::new(config);
        let provisioner = CertificateProvisioner::new(deps.certificate_loader, config.clone());
        let license = LicenseClient::new(deps.license_transport, config.key_load_policy)
            .with_hooks(config.hooks.license.clone())
            .with_strict(config.strict);
        let binder = MediaKeysBinder::new(deps.barrier.pending());

        let inner = Arc::new_cyclic(|weak| ControllerInner {
            negotiator: KeySystemNegotiator::new(
                deps.access,
                provisioner,
                config.drm_system_options.clone(),
            ),
            binder,
            registry: SessionRegistry::new(),
            license,
            reporter: ErrorReporter::new(deps.errors),
            barrier: deps.barrier,
            codecs: Mutex::new(CodecSet::default()),
            key_format: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            weak: weak.clone(),
            config,
        });
        Self { inner }
    }

    /// A controller using the HTTP loader and transport and the process-wide
    /// cleanup barrier.
    pub fn with_defaults(
        config: DrmConfig,
        access: Arc<dyn KeySystemAccessProvider>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self::new(
            config,
            ControllerDeps {
                access,
                certificate_loader: Arc::new(HttpLoader::new()),
                license_transport: Arc::new(HttpLicenseTransport::new()),
                errors,
                barrier: CdmCleanupBarrier::shared(),
            },
        )
    }

    pub fn config(&self) -> &DrmConfig {
        &self.inner.config
    }

    pub fn barrier(&self) -> &Arc<CdmCleanupBarrier> {
        &self.inner.barrier
    }

    /// Live session contexts, in creation order.
    pub fn sessions(&self) -> Vec<Arc<KeySessionContext>> {
        self.inner.registry.contexts()
    }

    /// Formats of every key system whose CDM handle was created.
    pub fn selected_key_system_formats(&self) -> Vec<KeySystemFormat> {
        self.inner.negotiator.selected_key_system_formats()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Player events
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn handle_event(&self, event: PlayerEvent) {
        tracing::trace!("key-system controller event {:?}", event);
        match event {
            PlayerEvent::MediaAttached(media) => self.on_media_attached(media),
            PlayerEvent::MediaDetached => self.on_media_detached(),
            PlayerEvent::ManifestLoading => self.on_manifest_loading(),
            PlayerEvent::ManifestLoaded {
                session_keys,
                levels,
            } => self.on_manifest_loaded(&session_keys, &levels),
            PlayerEvent::Encrypted {
                init_data_type,
                init_data,
            } => {
                if let Err(err) = self.on_media_encrypted(&init_data_type, init_data).await {
                    self.inner.reporter.report(&err);
                }
            }
            PlayerEvent::WaitingForKey => tracing::debug!("media is waiting for a key"),
            PlayerEvent::Destroying => self.destroy().await,
        }
    }

    pub fn on_media_attached(&self, media: Arc<dyn MediaElement>) {
        if !self.inner.config.eme_enabled {
            return;
        }
        self.inner.binder.set_media(Some(media));
    }

    pub fn on_media_detached(&self) {
        self.inner.binder.set_media(None);
    }

    /// Forget the key-system selection of the previous manifest.
    pub fn on_manifest_loading(&self) {
        *self.inner.key_format.lock().unwrap() = None;
    }

    /// Record the manifest's codecs and start key-system selection from its
    /// session keys.
    pub fn on_manifest_loaded(&self, session_keys: &[DecryptDescriptor], levels: &[LevelCodecs]) {
        *self.inner.codecs.lock().unwrap() = CodecSet::from_levels(
            levels
                .iter()
                .map(|l| (l.audio.as_deref(), l.video.as_deref())),
        );

        if !self.inner.config.eme_enabled || session_keys.is_empty() {
            return;
        }
        let mut formats: Vec<KeySystemFormat> = Vec::new();
        for key in session_keys {
            match key.format() {
                Some(format) if !formats.contains(&format) => formats.push(format),
                Some(_) => {}
                None => tracing::debug!("ignoring session key with format {}", key.key_format),
            }
        }
        tracing::debug!(
            "selecting key system from session keys {:?}",
            formats.iter().map(KeySystemFormat::as_str).collect::<Vec<_>>()
        );
        let _ = self.inner.select_key_system_format(&formats);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key-system selection
    // ─────────────────────────────────────────────────────────────────────────

    /// Select a key system among the given key formats.
    ///
    /// The selection runs once per manifest load; later calls share it
    /// whatever formats they pass.
    pub async fn select_key_system_format(
        &self,
        formats: &[KeySystemFormat],
    ) -> Result<KeySystemFormat> {
        self.inner.select_key_system_format(formats).await
    }

    /// Negotiate the first usable key system among `candidates`, falling back
    /// to the configured key systems when `candidates` is empty.
    pub async fn select_key_system(&self, candidates: &[KeySystem]) -> Result<KeySystem> {
        self.inner.select_key_system(candidates).await.map(|(ks, _)| ks)
    }

    /// Select a key system and bind its CDM handle to the media element.
    pub async fn get_key_system_access(&self, candidates: &[KeySystem]) -> Result<KeySystem> {
        let (key_system, cdm) = self.inner.select_key_system(candidates).await?;
        self.inner.binder.bind(cdm).await?;
        Ok(key_system)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Acquire the session for `descriptor`'s key.
    ///
    /// Concurrent and repeated calls for one key id share one acquisition. A
    /// failed acquisition is forgotten, so a later call starts over.
    pub async fn load_key(&self, descriptor: DecryptDescriptor) -> Result<Arc<KeySessionContext>> {
        let Some(key_id_hex) = descriptor.key_id_hex() else {
            return Err(KeySystemError::invalid_state(format!(
                "cannot load key without a key id {}",
                descriptor.details()
            )));
        };

        let inner = &self.inner;
        let task = inner.registry.get_or_insert_with(&key_id_hex, || {
            let acquirer = inner.clone();
            spawn_shared(async move { acquirer.acquire_key_session(descriptor).await })
        });

        let result = task.clone().await;
        if result.is_err() {
            inner.registry.remove_task(&key_id_hex, &task);
        }
        result
    }

    /// Handle init data delivered by the media element.
    ///
    /// Only `sinf` init data for FairPlay is acted on: its key id is matched
    /// against sessions created from playlist metadata.
    pub async fn on_media_encrypted(
        &self,
        init_data_type: &str,
        init_data: Option<Bytes>,
    ) -> Result<EncryptedOutcome> {
        let inner = &self.inner;
        let Some(init_data) = init_data else {
            return Ok(EncryptedOutcome::Ignored);
        };

        let format = inner.key_format_for_encrypted_event().await?;
        let key_system = format.key_system();
        if init_data_type != "sinf" || key_system != KeySystem::FairPlay {
            tracing::debug!(
                "ignoring \"encrypted\" event with init data type \"{}\" for key system {}",
                init_data_type,
                key_system
            );
            return Ok(EncryptedOutcome::Ignored);
        }

        let key_id = match key_id_from_sinf_json(&init_data) {
            Ok(key_id) => key_id,
            Err(e) => {
                tracing::warn!("\"encrypted\" event: failed to parse sinf: {}", e);
                return Ok(EncryptedOutcome::Ignored);
            }
        };
        let key_id_hex = key_id.to_hex();

        for context in inner.registry.find_by_key_id(&key_id) {
            let descriptor = context.descriptor();
            let Some(old_key_id_hex) = descriptor.key_id_hex() else {
                continue;
            };
            // Skip contexts with no load in the registry.
            let Some(previous) = inner.registry.task(&old_key_id_hex) else {
                continue;
            };
            if descriptor.pssh.is_some() {
                return Ok(EncryptedOutcome::Reused(context));
            }

            inner.registry.take_task(&old_key_id_hex);
            context.update_descriptor(|d| {
                d.pssh = Some(init_data.clone());
                d.key_id = Some(key_id);
            });

            let generator = inner.clone();
            let target = context.clone();
            let init_data_type = init_data_type.to_string();
            let task = spawn_shared(async move {
                previous.await?;
                generator
                    .generate_request_with_preferred_session(
                        target,
                        &init_data_type,
                        Some(init_data),
                        GenerateReason::EncryptedEventKeyMatch,
                    )
                    .await
            });
            inner.registry.insert_task(key_id_hex, task.clone());

            let reporter = inner.reporter.clone();
            tokio::spawn(async move {
                if let Err(err) = task.await {
                    reporter.report(&err);
                }
            });
            return Ok(EncryptedOutcome::Generated(context));
        }

        if let Some(task) = inner.registry.task(&key_id_hex) {
            return task.await.map(EncryptedOutcome::Reused);
        }

        inner.reporter.report(&KeySystemError::new(
            ErrorKind::NoKeys,
            format!(
                "Key ID {} not encountered in playlist. Key-system sessions {}.",
                key_id_hex,
                inner.registry.contexts().len()
            ),
        ));
        Ok(EncryptedOutcome::Unmatched)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Tear everything down: remove every session and detach the CDM handle
    /// from the media element. Later controllers' first bind waits for this
    /// to finish. Runs once.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        *inner.key_format.lock().unwrap() = None;

        let contexts = inner.registry.clear();
        let bound = inner.binder.active().is_some();
        let media = inner.binder.take_media();
        if contexts.is_empty() && !bound {
            tracing::debug!("key-system controller destroyed with nothing to clean up");
            return;
        }

        let session_count = contexts.len();
        let cleanup_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let removals = join_all(contexts.iter().map(|c| cleanup_inner.remove_session(c)));
            let detach = async {
                if let Some(media) = media {
                    if let Err(err) = cleanup_inner.binder.detach(media).await {
                        cleanup_inner.reporter.report(&err);
                    }
                }
            };
            tokio::join!(removals, detach);
            tracing::debug!(
                "finished closing {} key session(s) and clearing media keys",
                session_count
            );
        });

        let cleanup = inner.barrier.install(
            async move {
                let _ = handle.await;
            }
            .boxed(),
        );
        cleanup.await;
    }
}

impl ControllerInner {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn throw_if_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(KeySystemError::invalid_state("key-system controller destroyed"));
        }
        Ok(())
    }

    fn select_key_system_format(&self, formats: &[KeySystemFormat]) -> SharedTask<KeySystemFormat> {
        let mut memo = self.key_format.lock().unwrap();
        if let Some(task) = memo.as_ref() {
            return task.clone();
        }

        let configured = self.config.key_systems_for_config();
        let candidates: Vec<KeySystem> = formats
            .iter()
            .map(KeySystemFormat::key_system)
            .filter(|ks| configured.contains(ks))
            .collect();

        let task = match self.weak.upgrade() {
            Some(inner) => spawn_shared(async move {
                let (key_system, _) = inner.select_key_system(&candidates).await?;
                Ok(key_system.format())
            }),
            None => futures::future::ready(Err(KeySystemError::invalid_state(
                "key-system controller dropped",
            )))
            .boxed()
            .shared(),
        };
        *memo = Some(task.clone());
        task
    }

    /// The key format for an `encrypted` event, starting selection from the
    /// key systems already requested (or configured) when none ran yet.
    async fn key_format_for_encrypted_event(&self) -> Result<KeySystemFormat> {
        let existing = self.key_format.lock().unwrap().clone();
        let task = match existing {
            Some(task) => task,
            None => {
                let mut key_systems = self.negotiator.requested_key_systems();
                if key_systems.is_empty() {
                    key_systems = self.config.key_systems_for_config();
                }
                let formats: Vec<KeySystemFormat> =
                    key_systems.iter().map(KeySystem::format).collect();
                self.select_key_system_format(&formats)
            }
        };
        task.await
    }

    pub(crate) async fn select_key_system(
        &self,
        candidates: &[KeySystem],
    ) -> Result<(KeySystem, Arc<dyn Cdm>)> {
        let mut candidates = candidates.to_vec();
        if candidates.is_empty() {
            candidates = self.config.key_systems_for_config();
        }
        if candidates.is_empty() {
            return Err(KeySystemError::new(
                ErrorKind::NoConfiguredLicense,
                "missing key-system license configuration options",
            ));
        }
        let codecs = self.codecs.lock().unwrap().clone();
        self.negotiator.negotiate(&candidates, &codecs).await
    }

    /// Negotiate, bind, create the session and generate its request.
    async fn acquire_key_session(
        &self,
        descriptor: DecryptDescriptor,
    ) -> Result<Arc<KeySessionContext>> {
        let candidates: Vec<KeySystem> = descriptor.format().map(|f| f.key_system()).into_iter().collect();
        let (key_system, cdm) = self.select_key_system(&candidates).await?;
        self.throw_if_destroyed()?;
        tracing::debug!(
            "loading key {} with {} ({})",
            descriptor.details(),
            key_system,
            cdm.id()
        );

        self.binder.bind(cdm.clone()).await?;
        self.throw_if_destroyed()?;

        let pssh = descriptor.pssh.clone();
        let context = self.create_key_session_context(key_system, cdm, descriptor)?;
        self.generate_request_with_preferred_session(
            context,
            "cenc",
            pssh,
            GenerateReason::PlaylistKey,
        )
        .await
    }
}
