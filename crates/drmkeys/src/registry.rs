//! Session registry: in-flight acquisitions keyed by key-id hex, plus the
//! live session contexts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use drmkeys_core::KeyId;

use crate::session::KeySessionContext;
use crate::task::SharedTask;

pub type SessionTask = SharedTask<Arc<KeySessionContext>>;

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<String, SessionTask>,
    contexts: Vec<Arc<KeySessionContext>>,
}

/// At most one acquisition per key id; every caller shares it.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, key_id_hex: &str) -> Option<SessionTask> {
        self.state.lock().unwrap().tasks.get(key_id_hex).cloned()
    }

    /// Return the acquisition for `key_id_hex`, starting it with `start` when
    /// none exists. The check and the insert happen under one lock.
    pub fn get_or_insert_with(
        &self,
        key_id_hex: &str,
        start: impl FnOnce() -> SessionTask,
    ) -> SessionTask {
        let mut state = self.state.lock().unwrap();
        state
            .tasks
            .entry(key_id_hex.to_string())
            .or_insert_with(start)
            .clone()
    }

    pub fn insert_task(&self, key_id_hex: impl Into<String>, task: SessionTask) {
        self.state.lock().unwrap().tasks.insert(key_id_hex.into(), task);
    }

    /// Remove the entry for `key_id_hex` when it is still `task`.
    pub fn remove_task(&self, key_id_hex: &str, task: &SessionTask) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.tasks.get(key_id_hex).is_some_and(|t| t.ptr_eq(task)) {
            state.tasks.remove(key_id_hex);
            return true;
        }
        false
    }

    /// Remove and return the entry for `key_id_hex`.
    pub fn take_task(&self, key_id_hex: &str) -> Option<SessionTask> {
        self.state.lock().unwrap().tasks.remove(key_id_hex)
    }

    /// Drop every entry whose task resolves to `context`.
    pub fn remove_entries_for(&self, context: &Arc<KeySessionContext>) {
        let mut state = self.state.lock().unwrap();
        state.tasks.retain(|_, task| match task.peek() {
            Some(Ok(ctx)) => !Arc::ptr_eq(ctx, context),
            _ => true,
        });
    }

    pub fn add_context(&self, context: Arc<KeySessionContext>) {
        self.state.lock().unwrap().contexts.push(context);
    }

    pub fn remove_context(&self, context: &Arc<KeySessionContext>) {
        self.state
            .lock()
            .unwrap()
            .contexts
            .retain(|c| !Arc::ptr_eq(c, context));
    }

    pub fn contexts(&self) -> Vec<Arc<KeySessionContext>> {
        self.state.lock().unwrap().contexts.clone()
    }

    /// First live context whose descriptor claims `key_id`.
    /// Live contexts whose descriptor matches `key_id`, in creation order.
    pub fn find_by_key_id(&self, key_id: &KeyId) -> Vec<Arc<KeySessionContext>> {
        let state = self.state.lock().unwrap();
        state
            .contexts
            .iter()
            .filter(|c| {
                let descriptor = c.descriptor();
                descriptor.key_id.is_some() && descriptor.matches_key_id(key_id)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the registry, returning the contexts it held.
    pub fn clear(&self) -> Vec<Arc<KeySessionContext>> {
        let mut state = self.state.lock().unwrap();
        state.tasks.clear();
        std::mem::take(&mut state.contexts)
    }
}
