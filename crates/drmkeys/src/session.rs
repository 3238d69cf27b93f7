//! Key session contexts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use drmkeys_core::{DecryptDescriptor, KeyStatus, KeySystem};
use drmkeys_host::{Cdm, NativeSession, SubscriptionId};

use crate::error::Result;

/// Where a session is in the license protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolState {
    Created,
    RequestGenerated,
    AwaitingMessage,
    LicenseRequested,
    Usable,
    OutputRestricted,
    InternalError,
    Expired,
    Closed,
}

#[derive(Debug)]
struct ContextState {
    key_status: Option<KeyStatus>,
    protocol: ProtocolState,
    license_task: Option<AbortHandle>,
    subscription: Option<SubscriptionId>,
    pump: Option<AbortHandle>,
    /// Receives the outcome of the pending `generate_request`.
    waiter: Option<mpsc::UnboundedSender<Result<()>>>,
}

/// One live key session: a native session plus the descriptor it serves.
pub struct KeySessionContext {
    key_system: KeySystem,
    cdm: Arc<dyn Cdm>,
    native: Arc<dyn NativeSession>,
    descriptor: Mutex<DecryptDescriptor>,
    state: Mutex<ContextState>,
    removed: AtomicBool,
    renewing: AtomicBool,
}

impl KeySessionContext {
    pub fn new(
        key_system: KeySystem,
        cdm: Arc<dyn Cdm>,
        native: Arc<dyn NativeSession>,
        descriptor: DecryptDescriptor,
    ) -> Arc<Self> {
        Arc::new(Self {
            key_system,
            cdm,
            native,
            descriptor: Mutex::new(descriptor),
            state: Mutex::new(ContextState {
                key_status: None,
                protocol: ProtocolState::Created,
                license_task: None,
                subscription: None,
                pump: None,
                waiter: None,
            }),
            removed: AtomicBool::new(false),
            renewing: AtomicBool::new(false),
        })
    }

    pub fn key_system(&self) -> KeySystem {
        self.key_system
    }

    pub fn cdm(&self) -> &Arc<dyn Cdm> {
        &self.cdm
    }

    pub fn native(&self) -> &Arc<dyn NativeSession> {
        &self.native
    }

    pub fn session_id(&self) -> String {
        self.native.session_id()
    }

    pub fn descriptor(&self) -> DecryptDescriptor {
        self.descriptor.lock().unwrap().clone()
    }

    pub fn update_descriptor(&self, f: impl FnOnce(&mut DecryptDescriptor)) {
        f(&mut self.descriptor.lock().unwrap());
    }

    /// Last key status observed for this session.
    pub fn key_status(&self) -> Option<KeyStatus> {
        self.state.lock().unwrap().key_status
    }

    pub(crate) fn set_key_status(&self, status: KeyStatus) {
        self.state.lock().unwrap().key_status = Some(status);
    }

    pub fn state(&self) -> ProtocolState {
        self.state.lock().unwrap().protocol
    }

    pub(crate) fn set_state(&self, protocol: ProtocolState) {
        let mut state = self.state.lock().unwrap();
        if state.protocol != ProtocolState::Closed {
            state.protocol = protocol;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background work
    // ─────────────────────────────────────────────────────────────────────────

    /// Track a new license round trip, aborting the previous one.
    pub(crate) fn replace_license_task(&self, handle: AbortHandle) {
        let previous = self.state.lock().unwrap().license_task.replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn set_pump(&self, subscription: SubscriptionId, pump: AbortHandle) {
        let mut state = self.state.lock().unwrap();
        state.subscription = Some(subscription);
        state.pump = Some(pump);
    }

    pub(crate) fn has_pump(&self) -> bool {
        self.state.lock().unwrap().pump.is_some()
    }

    /// Stop event delivery and in-flight license work.
    pub(crate) fn stop_background(&self) {
        let (subscription, pump, license) = {
            let mut state = self.state.lock().unwrap();
            (
                state.subscription.take(),
                state.pump.take(),
                state.license_task.take(),
            )
        };
        if let Some(id) = subscription {
            self.native.unsubscribe(id);
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(license) = license {
            license.abort();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request waiter
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn attach_waiter(&self) -> mpsc::UnboundedReceiver<Result<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().waiter = Some(tx);
        rx
    }

    pub(crate) fn detach_waiter(&self) {
        self.state.lock().unwrap().waiter = None;
    }

    /// Deliver an outcome to the pending request. Returns the outcome back
    /// when no request is waiting.
    pub(crate) fn notify_waiter(&self, outcome: Result<()>) -> Option<Result<()>> {
        let state = self.state.lock().unwrap();
        match &state.waiter {
            Some(tx) => tx.send(outcome).err().map(|e| e.0),
            None => Some(outcome),
        }
    }

    pub fn has_waiter(&self) -> bool {
        self.state.lock().unwrap().waiter.is_some()
    }

    /// Mark for removal. Returns `false` when already marked.
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::SeqCst)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Claim the renewal of this session. Returns `false` when already claimed.
    pub(crate) fn begin_renewal(&self) -> bool {
        !self.renewing.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for KeySessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySessionContext")
            .field("key_system", &self.key_system)
            .field("session_id", &self.native.session_id())
            .field("descriptor", &self.descriptor())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drmkeys_core::{CodecSet, DrmSystemOptions, KeySystemError};
    use drmkeys_host::{KeySystemAccessProvider, MemoryHost};

    async fn context() -> Arc<KeySessionContext> {
        let host = MemoryHost::new();
        let ks = KeySystem::Widevine;
        let configs = drmkeys_core::supported_configurations(
            ks,
            &CodecSet::default(),
            &DrmSystemOptions::default(),
        );
        let cdm = host
            .request_access(ks, &configs)
            .await
            .unwrap()
            .create_cdm()
            .await
            .unwrap();
        let native = cdm.create_session("temporary").unwrap();
        KeySessionContext::new(ks, cdm, native, DecryptDescriptor::new("urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed", "data:"))
    }

    #[tokio::test]
    async fn test_waiter_receives_outcome() {
        let ctx = context().await;
        let mut rx = ctx.attach_waiter();
        assert!(ctx.notify_waiter(Ok(())).is_none());
        assert_eq!(rx.recv().await, Some(Ok(())));

        ctx.detach_waiter();
        let err = KeySystemError::invalid_state("x");
        assert_eq!(ctx.notify_waiter(Err(err.clone())), Some(Err(err)));
    }

    #[tokio::test]
    async fn test_mark_removed_once() {
        let ctx = context().await;
        assert!(ctx.mark_removed());
        assert!(!ctx.mark_removed());
        assert!(ctx.is_removed());
    }

    #[tokio::test]
    async fn test_closed_state_is_final() {
        let ctx = context().await;
        ctx.set_state(ProtocolState::Closed);
        ctx.set_state(ProtocolState::Usable);
        assert_eq!(ctx.state(), ProtocolState::Closed);
    }

    #[tokio::test]
    async fn test_replacing_license_task_aborts_previous() {
        let ctx = context().await;
        let first = tokio::spawn(futures::future::pending::<()>());
        ctx.replace_license_task(first.abort_handle());
        let second = tokio::spawn(futures::future::pending::<()>());
        ctx.replace_license_task(second.abort_handle());

        assert!(first.await.unwrap_err().is_cancelled());
        ctx.stop_background();
        assert!(second.await.unwrap_err().is_cancelled());
    }
}
