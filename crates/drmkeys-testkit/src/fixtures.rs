//! Test fixtures and helpers.
//!
//! A [`TestHarness`] wires a controller to the in-memory host, loader and
//! license server, and keeps handles to all of them for assertions.

use std::sync::Arc;
use std::time::Duration;

use drmkeys::{
    CdmCleanupBarrier, ControllerDeps, DrmConfig, ErrorKind, ErrorLog, KeySystemController,
};
use drmkeys_core::{DecryptDescriptor, KeyId, KeySystem};
use drmkeys_host::{HostScript, MemoryHost, MemoryMediaElement, MemorySession};
use drmkeys_license::loader::memory::MemoryLoader;
use drmkeys_license::transport::memory::ScriptedLicenseServer;

use crate::vectors;

/// License URL configured for `key_system` by [`config_for`].
pub fn license_url(key_system: KeySystem) -> String {
    format!("https://license.test/{}", key_system.domain())
}

/// A config with a license URL for every given key system.
pub fn config_for(key_systems: &[KeySystem]) -> DrmConfig {
    key_systems
        .iter()
        .fold(DrmConfig::default(), |config, ks| {
            config.with_license_url(*ks, license_url(*ks))
        })
}

/// A descriptor for `key_id` on `key_system`, with a PSSH listing the key.
pub fn key_for(key_system: KeySystem, key_id: &KeyId) -> DecryptDescriptor {
    let uri = match key_system {
        KeySystem::FairPlay => format!("skd://{}", key_id.to_hex()),
        _ => "data:text/plain;base64,".to_string(),
    };
    DecryptDescriptor::new(key_system.format().as_str(), uri)
        .with_key_id(key_id.clone())
        .with_pssh(vectors::pssh(key_system, std::slice::from_ref(key_id)))
}

/// A FairPlay descriptor announced by the playlist only: key id and `skd://`
/// URI, no init data yet.
pub fn fairplay_playlist_key(key_id: &KeyId) -> DecryptDescriptor {
    DecryptDescriptor::new(
        KeySystem::FairPlay.format().as_str(),
        format!("skd://{}", key_id.to_hex()),
    )
    .with_key_id(key_id.clone())
}

/// Install a test-writer tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .try_init();
}

/// Poll `condition` until it holds or about a second passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A controller over in-memory collaborators.
pub struct TestHarness {
    pub controller: KeySystemController,
    pub host: MemoryHost,
    pub media: Arc<MemoryMediaElement>,
    pub loader: Arc<MemoryLoader>,
    pub server: Arc<ScriptedLicenseServer>,
    pub errors: Arc<ErrorLog>,
    pub barrier: Arc<CdmCleanupBarrier>,
}

impl TestHarness {
    /// A harness with the default host script and the media attached.
    pub fn new(config: DrmConfig) -> Self {
        Self::with_script(config, HostScript::default())
    }

    pub fn with_script(config: DrmConfig, script: HostScript) -> Self {
        Self::build(
            config,
            MemoryHost::with_script(script),
            Arc::new(MemoryMediaElement::new()),
            Arc::new(CdmCleanupBarrier::new()),
        )
    }

    /// A harness whose media element holds every attach call for `delay`.
    pub fn with_media_delay(config: DrmConfig, delay: Duration) -> Self {
        Self::build(
            config,
            MemoryHost::new(),
            Arc::new(MemoryMediaElement::with_delay(delay)),
            Arc::new(CdmCleanupBarrier::new()),
        )
    }

    /// A second controller on the same host, media element and barrier, as a
    /// player does when it is recreated.
    pub fn successor(&self, config: DrmConfig) -> Self {
        Self::build(
            config,
            self.host.clone(),
            self.media.clone(),
            self.barrier.clone(),
        )
    }

    fn build(
        config: DrmConfig,
        host: MemoryHost,
        media: Arc<MemoryMediaElement>,
        barrier: Arc<CdmCleanupBarrier>,
    ) -> Self {
        init_tracing();
        let loader = Arc::new(MemoryLoader::new());
        let server = Arc::new(ScriptedLicenseServer::new());
        let errors = Arc::new(ErrorLog::new());
        let controller = KeySystemController::new(
            config,
            ControllerDeps {
                access: Arc::new(host.clone()),
                certificate_loader: loader.clone(),
                license_transport: server.clone(),
                errors: errors.clone(),
                barrier: barrier.clone(),
            },
        );
        controller.on_media_attached(media.clone());
        Self {
            controller,
            host,
            media,
            loader,
            server,
            errors,
            barrier,
        }
    }

    /// The host session at creation index `index`.
    pub fn session(&self, index: usize) -> Arc<MemorySession> {
        self.host.sessions()[index].clone()
    }

    /// Error kinds published so far.
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors.kinds()
    }
}
