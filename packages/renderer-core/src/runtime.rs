//! Task spawning abstraction for runtime independence.
//!
//! Every pipeline element is conceptually "one worker thread"; this crate realizes
//! each as a spawned task (§2, §5) rather than tying element code to a concrete
//! executor. A [`TaskSpawner`] lets the pipeline and protocol layers spawn their
//! per-element loops without depending on `tokio::spawn` directly, so a host
//! embedding this crate can supply its own executor.

use std::future::Future;

/// Abstraction for spawning a pipeline element's task.
///
/// The spawned future runs independently; the spawner gives no cancellation or
/// join handle back, matching the "fire and forget, shut down via `Quit`" model
/// the pipeline itself uses for stage teardown.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner; the default for a standalone renderer process.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new spawner from an explicit runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a spawner using the current runtime's handle.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(executed.load(Ordering::SeqCst));
    }
}
