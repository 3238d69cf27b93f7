//! Serialized attachment of CDM handles to the media element.
//!
//! The host forbids overlapping `setMediaKeys` calls on one element, so every
//! attach and detach joins a FIFO queue. Each queued call snapshots the
//! entries ahead of it and waits for all of them (success or failure) before
//! it runs. The media element is read when the call executes, not when it is
//! queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};

use drmkeys_core::{ErrorKind, KeySystemError};
use drmkeys_host::{Cdm, CdmId, MediaElement};

use crate::barrier::Cleanup;
use crate::error::Result;
use crate::task::{spawn_shared, SharedTask};

struct Ticket {
    id: u64,
    done: Shared<BoxFuture<'static, ()>>,
}

#[derive(Default)]
struct BinderState {
    queue: VecDeque<Ticket>,
    /// The handle most recently bound, with the call that binds it.
    current: Option<(CdmId, SharedTask<()>)>,
    media: Option<Arc<dyn MediaElement>>,
    next_ticket: u64,
}

#[derive(Clone)]
pub struct MediaKeysBinder {
    inner: Arc<Mutex<BinderState>>,
}

impl MediaKeysBinder {
    /// Create a binder whose first call waits for `pending`, typically the
    /// previous controller's teardown.
    pub fn new(pending: Option<Cleanup>) -> Self {
        let mut state = BinderState {
            next_ticket: 1,
            ..Default::default()
        };
        if let Some(done) = pending {
            state.queue.push_back(Ticket { id: 0, done });
        }
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Attach `cdm` to the media element.
    ///
    /// Binding the handle that is already bound (or being bound) makes no
    /// host call and resolves with the existing call's result.
    pub async fn bind(&self, cdm: Arc<dyn Cdm>) -> Result<()> {
        let task = {
            let mut state = self.inner.lock().unwrap();
            match &state.current {
                Some((id, task)) if *id == cdm.id() => task.clone(),
                _ => {
                    let id = cdm.id();
                    let task = self.enqueue(&mut state, Some(cdm), None, ErrorKind::NoKeys);
                    state.current = Some((id, task.clone()));
                    task
                }
            }
        };
        task.await
    }

    /// Queue `set_media_keys(None)` on `media`, after every queued call.
    pub async fn detach(&self, media: Arc<dyn MediaElement>) -> Result<()> {
        let task = {
            let mut state = self.inner.lock().unwrap();
            state.current = None;
            self.enqueue(&mut state, None, Some(media), ErrorKind::DestroyMediaKeysError)
        };
        task.await
    }

    /// Record the attached media element. Detaching forgets the bound handle
    /// so a later attach binds again.
    pub fn set_media(&self, media: Option<Arc<dyn MediaElement>>) {
        let mut state = self.inner.lock().unwrap();
        if media.is_none() {
            state.current = None;
        }
        state.media = media;
    }

    /// Take the media element, leaving none attached.
    pub fn take_media(&self) -> Option<Arc<dyn MediaElement>> {
        let mut state = self.inner.lock().unwrap();
        state.current = None;
        state.media.take()
    }

    pub fn has_media(&self) -> bool {
        self.inner.lock().unwrap().media.is_some()
    }

    /// The handle most recently bound or being bound.
    pub fn active(&self) -> Option<CdmId> {
        self.inner.lock().unwrap().current.as_ref().map(|(id, _)| *id)
    }

    /// Calls queued and not yet finished.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    fn enqueue(
        &self,
        state: &mut BinderState,
        cdm: Option<Arc<dyn Cdm>>,
        media: Option<Arc<dyn MediaElement>>,
        failure: ErrorKind,
    ) -> SharedTask<()> {
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let previous: Vec<_> = state.queue.iter().map(|t| t.done.clone()).collect();
        let previous_ids: Vec<u64> = state.queue.iter().map(|t| t.id).collect();
        let inner = self.inner.clone();
        let cdm_id = cdm.as_ref().map(|c| c.id());

        let task = spawn_shared(async move {
            join_all(previous).await;

            let media = media.or_else(|| inner.lock().unwrap().media.clone());
            let result = match media {
                None => Err(KeySystemError::invalid_state(
                    "attempted to set media keys without a media element attached",
                )),
                Some(media) => media.set_media_keys(cdm).await.map_err(|e| {
                    KeySystemError::new(failure, format!("failed to set media keys: {e}"))
                }),
            };

            let mut state = inner.lock().unwrap();
            state
                .queue
                .retain(|t| t.id != ticket && !previous_ids.contains(&t.id));
            if result.is_err()
                && cdm_id.is_some()
                && state.current.as_ref().map(|(id, _)| *id) == cdm_id
            {
                state.current = None;
            }
            match cdm_id {
                Some(id) => tracing::debug!("bind of {} finished: {:?}", id, result),
                None => tracing::debug!("media keys detach finished: {:?}", result),
            }
            result
        });

        state.queue.push_back(Ticket {
            id: ticket,
            done: task.clone().map(|_| ()).boxed().shared(),
        });
        task
    }
}
