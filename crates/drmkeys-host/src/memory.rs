//! In-memory implementation of the host traits.
//!
//! This is primarily for testing. Behaviour is driven by a [`HostScript`] and
//! every call is recorded, so ordering and dedupe invariants can be asserted
//! directly against the host's view of the world.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use drmkeys_core::{
    key_id_from_sinf_json, KeyStatus, KeySystem, MediaKeySystemConfiguration, MessageType,
    PsshBox, RawKeyStatus,
};

use crate::error::{HostError, Result};
use crate::traits::{
    Cdm, CdmId, KeySystemAccess, KeySystemAccessProvider, MediaElement, NativeSession,
    SessionEvent, SessionSubscription, SubscriptionId,
};

/// Scripted host behaviour.
#[derive(Clone, Debug)]
pub struct HostScript {
    /// Key systems the host grants access to.
    pub supported: Vec<KeySystem>,
    pub fail_create_cdm: bool,
    pub reject_certificate: bool,
    pub fail_generate: bool,
    pub reject_update: bool,
    /// Statuses applied, in order, after a successful `update`. Each one
    /// raises its own key-status change event.
    pub statuses_after_update: Vec<KeyStatus>,
    /// Raise a `license-request` message from `generate_request`.
    pub emit_license_request: bool,
    /// Deliver key-status entries with the values swapped.
    pub swap_status_order: bool,
    pub fail_remove: bool,
    pub remove_delay: Option<Duration>,
    pub fail_close: bool,
}

impl Default for HostScript {
    fn default() -> Self {
        Self {
            supported: KeySystem::ALL.to_vec(),
            fail_create_cdm: false,
            reject_certificate: false,
            fail_generate: false,
            reject_update: false,
            statuses_after_update: vec![KeyStatus::Usable],
            emit_license_request: true,
            swap_status_order: false,
            fail_remove: false,
            remove_delay: None,
            fail_close: false,
        }
    }
}

#[derive(Default)]
struct HostLog {
    access_requests: Vec<(KeySystem, Vec<MediaKeySystemConfiguration>)>,
    cdms: Vec<CdmId>,
    certificates: Vec<(CdmId, Bytes)>,
    sessions: Vec<Arc<MemorySession>>,
}

struct HostState {
    script: RwLock<HostScript>,
    log: Mutex<HostLog>,
}

impl HostState {
    fn script(&self) -> HostScript {
        self.script.read().unwrap().clone()
    }
}

/// In-memory host.
///
/// Cheap to clone; clones share script and call log.
#[derive(Clone)]
pub struct MemoryHost {
    state: Arc<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::with_script(HostScript::default())
    }

    pub fn with_script(script: HostScript) -> Self {
        Self {
            state: Arc::new(HostState {
                script: RwLock::new(script),
                log: Mutex::new(HostLog::default()),
            }),
        }
    }

    /// Change the script for subsequent calls.
    pub fn update_script(&self, f: impl FnOnce(&mut HostScript)) {
        f(&mut self.state.script.write().unwrap());
    }

    /// Key systems requested so far, in request order.
    pub fn access_requests(&self) -> Vec<KeySystem> {
        let log = self.state.log.lock().unwrap();
        log.access_requests.iter().map(|(ks, _)| *ks).collect()
    }

    /// Configurations offered with the most recent access request.
    pub fn last_configurations(&self) -> Option<Vec<MediaKeySystemConfiguration>> {
        let log = self.state.log.lock().unwrap();
        log.access_requests.last().map(|(_, c)| c.clone())
    }

    pub fn cdm_count(&self) -> usize {
        self.state.log.lock().unwrap().cdms.len()
    }

    pub fn certificates(&self) -> Vec<(CdmId, Bytes)> {
        self.state.log.lock().unwrap().certificates.clone()
    }

    /// Every session created so far, including closed ones.
    pub fn sessions(&self) -> Vec<Arc<MemorySession>> {
        self.state.log.lock().unwrap().sessions.clone()
    }

    /// Sessions not yet closed.
    pub fn open_sessions(&self) -> Vec<Arc<MemorySession>> {
        self.sessions()
            .into_iter()
            .filter(|s| !s.is_closed())
            .collect()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySystemAccessProvider for MemoryHost {
    async fn request_access(
        &self,
        key_system: KeySystem,
        configurations: &[MediaKeySystemConfiguration],
    ) -> Result<Arc<dyn KeySystemAccess>> {
        self.state
            .log
            .lock()
            .unwrap()
            .access_requests
            .push((key_system, configurations.to_vec()));

        if !self.state.script().supported.contains(&key_system) {
            return Err(HostError::NotSupported(key_system.to_string()));
        }
        tracing::debug!("memory host granted access to {}", key_system);
        Ok(Arc::new(MemoryAccess {
            key_system,
            host: self.state.clone(),
        }))
    }
}

struct MemoryAccess {
    key_system: KeySystem,
    host: Arc<HostState>,
}

#[async_trait]
impl KeySystemAccess for MemoryAccess {
    fn key_system(&self) -> KeySystem {
        self.key_system
    }

    async fn create_cdm(&self) -> Result<Arc<dyn Cdm>> {
        if self.host.script().fail_create_cdm {
            return Err(HostError::Rejected("createMediaKeys failed".into()));
        }
        let id = CdmId::next();
        self.host.log.lock().unwrap().cdms.push(id);
        Ok(Arc::new(MemoryCdm {
            id,
            key_system: self.key_system,
            host: self.host.clone(),
        }))
    }
}

struct MemoryCdm {
    id: CdmId,
    key_system: KeySystem,
    host: Arc<HostState>,
}

#[async_trait]
impl Cdm for MemoryCdm {
    fn id(&self) -> CdmId {
        self.id
    }

    fn key_system(&self) -> KeySystem {
        self.key_system
    }

    async fn set_server_certificate(&self, certificate: Bytes) -> Result<bool> {
        if self.host.script().reject_certificate {
            return Err(HostError::Rejected("certificate rejected".into()));
        }
        self.host
            .log
            .lock()
            .unwrap()
            .certificates
            .push((self.id, certificate));
        Ok(true)
    }

    fn create_session(&self, session_type: &str) -> Result<Arc<dyn NativeSession>> {
        let session = Arc::new(MemorySession {
            id: format!("session-{:08x}", rand::random::<u32>()),
            key_system: self.key_system,
            session_type: session_type.to_string(),
            cdm_id: self.id,
            host: self.host.clone(),
            next_subscription: AtomicU64::new(1),
            state: Mutex::new(SessionState::default()),
        });
        self.host.log.lock().unwrap().sessions.push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
struct SessionState {
    subscribers: HashMap<SubscriptionId, mpsc::UnboundedSender<SessionEvent>>,
    requests: Vec<(String, Bytes)>,
    updates: Vec<Bytes>,
    key_ids: Vec<Bytes>,
    statuses: Vec<RawKeyStatus>,
    removed: bool,
    closed: bool,
}

/// A scripted native session.
pub struct MemorySession {
    id: String,
    key_system: KeySystem,
    session_type: String,
    cdm_id: CdmId,
    host: Arc<HostState>,
    next_subscription: AtomicU64,
    state: Mutex<SessionState>,
}

impl MemorySession {
    pub fn key_system(&self) -> KeySystem {
        self.key_system
    }

    pub fn cdm_id(&self) -> CdmId {
        self.cdm_id
    }

    pub fn session_type(&self) -> &str {
        &self.session_type
    }

    /// Number of live event subscriptions.
    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// `(init data type, init data)` of every `generate_request` call.
    pub fn requests(&self) -> Vec<(String, Bytes)> {
        self.state.lock().unwrap().requests.clone()
    }

    /// License responses handed to `update`.
    pub fn updates(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Raise an event to every subscriber.
    pub fn emit(&self, event: SessionEvent) {
        let state = self.state.lock().unwrap();
        for tx in state.subscribers.values() {
            let _ = tx.send(event.clone());
        }
    }

    /// Set the status of every known key and raise a key-status change.
    pub fn set_status(&self, status: KeyStatus) {
        let swap = self.host.script().swap_status_order;
        {
            let mut state = self.state.lock().unwrap();
            let key_ids = if state.key_ids.is_empty() {
                vec![Bytes::new()]
            } else {
                state.key_ids.clone()
            };
            state.statuses = key_ids
                .into_iter()
                .map(|kid| {
                    let raw = RawKeyStatus::new(kid, status);
                    if swap {
                        raw.swapped()
                    } else {
                        raw
                    }
                })
                .collect();
        }
        self.emit(SessionEvent::KeyStatusesChange);
    }

    fn key_ids_from(init_data_type: &str, init_data: &[u8]) -> Vec<Bytes> {
        if init_data_type == "sinf" {
            return key_id_from_sinf_json(init_data)
                .map(|kid| vec![Bytes::copy_from_slice(kid.as_bytes())])
                .unwrap_or_default();
        }
        PsshBox::parse_all(init_data)
            .map(|boxes| {
                boxes
                    .into_iter()
                    .flat_map(|b| b.key_ids)
                    .map(|kid| Bytes::copy_from_slice(kid.as_bytes()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl NativeSession for MemorySession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn subscribe(&self) -> SessionSubscription {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscribers.insert(id, tx);
        SessionSubscription { id, events: rx }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().unwrap().subscribers.remove(&id);
    }

    async fn generate_request(&self, init_data_type: &str, init_data: Bytes) -> Result<()> {
        let script = self.host.script();
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(HostError::Closed);
            }
            state
                .requests
                .push((init_data_type.to_string(), init_data.clone()));
            if script.fail_generate {
                return Err(HostError::Rejected("generateRequest rejected".into()));
            }
            state.key_ids = Self::key_ids_from(init_data_type, &init_data);
        }

        if script.emit_license_request {
            self.emit(SessionEvent::Message {
                message_type: MessageType::LicenseRequest,
                message: init_data,
            });
        }
        Ok(())
    }

    async fn update(&self, response: Bytes) -> Result<()> {
        let script = self.host.script();
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(HostError::Closed);
            }
            state.updates.push(response);
            if script.reject_update {
                return Err(HostError::Rejected("update rejected".into()));
            }
        }
        for status in script.statuses_after_update {
            self.set_status(status);
        }
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let script = self.host.script();
        if let Some(delay) = script.remove_delay {
            tokio::time::sleep(delay).await;
        }
        if script.fail_remove {
            return Err(HostError::Rejected("remove rejected".into()));
        }
        self.state.lock().unwrap().removed = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let fail = self.host.script().fail_close;
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.subscribers.clear();
        if fail {
            return Err(HostError::Rejected("close rejected".into()));
        }
        Ok(())
    }

    fn key_statuses(&self) -> Vec<RawKeyStatus> {
        self.state.lock().unwrap().statuses.clone()
    }
}

#[derive(Default)]
struct MediaState {
    in_flight: usize,
    max_in_flight: usize,
    calls: Vec<Option<CdmId>>,
    active: Option<CdmId>,
}

/// In-memory media element recording attach calls.
#[derive(Default)]
pub struct MemoryMediaElement {
    state: Mutex<MediaState>,
    delay: Duration,
    fail: AtomicBool,
}

impl MemoryMediaElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every attach call for `delay` so overlapping calls would show.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every `set_media_keys` argument, in call order.
    pub fn attach_calls(&self) -> Vec<Option<CdmId>> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Highest number of concurrently executing attach calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn active(&self) -> Option<CdmId> {
        self.state.lock().unwrap().active
    }
}

#[async_trait]
impl MediaElement for MemoryMediaElement {
    async fn set_media_keys(&self, cdm: Option<Arc<dyn Cdm>>) -> Result<()> {
        let id = cdm.as_ref().map(|c| c.id());
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.calls.push(id);
        }

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Rejected("setMediaKeys failed".into()));
        }
        state.active = id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(host: &MemoryHost) -> Arc<dyn NativeSession> {
        let access = host.request_access(KeySystem::Widevine, &[]).await.unwrap();
        let cdm = access.create_cdm().await.unwrap();
        cdm.create_session("temporary").unwrap()
    }

    #[tokio::test]
    async fn test_unsupported_key_system() {
        let host = MemoryHost::with_script(HostScript {
            supported: vec![KeySystem::Widevine],
            ..Default::default()
        });
        let result = host.request_access(KeySystem::PlayReady, &[]).await;
        assert!(matches!(result, Err(HostError::NotSupported(_))));
        assert_eq!(host.access_requests(), vec![KeySystem::PlayReady]);
    }

    #[tokio::test]
    async fn test_generate_request_emits_message() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let mut sub = session.subscribe();

        session
            .generate_request("cenc", Bytes::from_static(b"init"))
            .await
            .unwrap();

        match sub.events.recv().await.unwrap() {
            SessionEvent::Message { message_type, message } => {
                assert_eq!(message_type, MessageType::LicenseRequest);
                assert_eq!(message.as_ref(), b"init");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_sets_statuses() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let mut sub = session.subscribe();
        session.update(Bytes::from_static(b"license")).await.unwrap();

        assert_eq!(sub.events.recv().await, Some(SessionEvent::KeyStatusesChange));
        let statuses = session.key_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].normalize().unwrap().1, KeyStatus::Usable);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close_drop_listeners() {
        let host = MemoryHost::new();
        let session = session(&host).await;
        let a = session.subscribe();
        let _b = session.subscribe();
        let recorded = host.sessions();
        assert_eq!(recorded[0].listener_count(), 2);

        session.unsubscribe(a.id);
        assert_eq!(recorded[0].listener_count(), 1);

        session.close().await.unwrap();
        assert_eq!(recorded[0].listener_count(), 0);
        assert!(recorded[0].is_closed());
    }

    #[tokio::test]
    async fn test_media_element_records_attaches() {
        let host = MemoryHost::new();
        let access = host.request_access(KeySystem::ClearKey, &[]).await.unwrap();
        let cdm = access.create_cdm().await.unwrap();
        let media = MemoryMediaElement::new();

        media.set_media_keys(Some(cdm.clone())).await.unwrap();
        media.set_media_keys(None).await.unwrap();

        assert_eq!(media.attach_calls(), vec![Some(cdm.id()), None]);
        assert_eq!(media.active(), None);
        assert_eq!(media.max_in_flight(), 1);
    }
}
