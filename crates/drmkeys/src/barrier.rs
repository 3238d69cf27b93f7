//! Process-wide CDM cleanup barrier.
//!
//! Teardown of one controller must finish before the next controller binds a
//! CDM to a media element, otherwise the host sees two overlapping
//! `setMediaKeys` calls. The barrier holds the pending teardown, and new
//! binders seed their queue with it.

use std::sync::{Arc, Mutex, OnceLock};

use futures::future::{BoxFuture, FutureExt, Shared};

/// A teardown every later bind must wait for.
pub type Cleanup = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
pub struct CdmCleanupBarrier {
    pending: Mutex<Option<Cleanup>>,
}

impl CdmCleanupBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The barrier shared by every controller in the process.
    pub fn shared() -> Arc<CdmCleanupBarrier> {
        static SHARED: OnceLock<Arc<CdmCleanupBarrier>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(CdmCleanupBarrier::new())).clone()
    }

    /// Publish a teardown. Returns the shared handle so the caller can await
    /// the same future.
    pub fn install(&self, cleanup: BoxFuture<'static, ()>) -> Cleanup {
        let cleanup = cleanup.shared();
        *self.pending.lock().unwrap() = Some(cleanup.clone());
        cleanup
    }

    /// The most recent teardown, if one was installed.
    pub fn pending(&self) -> Option<Cleanup> {
        self.pending.lock().unwrap().clone()
    }

    /// Wait for the most recent teardown to finish.
    pub async fn wait(&self) {
        let pending = self.pending();
        if let Some(cleanup) = pending {
            cleanup.await;
        }
    }

    /// Forget a completed teardown.
    pub fn reset(&self) {
        let mut pending = self.pending.lock().unwrap();
        if pending.as_ref().is_some_and(|c| c.peek().is_some()) {
            *pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_without_pending_returns() {
        let barrier = CdmCleanupBarrier::new();
        barrier.wait().await;
        assert!(barrier.pending().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_cleanup_done() {
        let barrier = CdmCleanupBarrier::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        barrier.install(
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                flag.store(true, Ordering::SeqCst);
            }
            .boxed(),
        );

        barrier.wait().await;
        assert!(done.load(Ordering::SeqCst));

        barrier.reset();
        assert!(barrier.pending().is_none());
    }

    #[test]
    fn test_reset_keeps_unfinished_cleanup() {
        let barrier = CdmCleanupBarrier::new();
        barrier.install(futures::future::pending::<()>().boxed());
        barrier.reset();
        assert!(barrier.pending().is_some());
    }
}
