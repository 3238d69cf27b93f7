//! Spawned, shareable tasks.
//!
//! Acquisitions are awaited by any number of callers and must make progress
//! even when the caller that started them goes away, so they are spawned and
//! the join handle is wrapped in a [`Shared`] future.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{KeySystemError, Result};

/// A spawned task whose result every awaiting clone receives.
pub type SharedTask<T> = Shared<BoxFuture<'static, Result<T>>>;

pub(crate) fn spawn_shared<T, F>(future: F) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(future);
    async move {
        handle.await.unwrap_or_else(|e| {
            Err(KeySystemError::invalid_state(format!("task did not complete: {e}")))
        })
    }
    .boxed()
    .shared()
}
