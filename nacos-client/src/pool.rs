//! Fire-and-forget task submission with bounded concurrency.
//!
//! Listener dispatch and snapshot persistence go through here so that a slow
//! listener or a slow disk never stalls a refresh path. Every submitted future
//! becomes a Tokio task that waits for a permit, so there are no long-lived
//! idle workers to reclaim.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY: usize = 1000;

#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl TaskPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Runs `task` in the background once a slot is free.
    ///
    /// Must be called from within a Tokio runtime. Tasks submitted after
    /// [`TaskPool::close`] are dropped without running.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.permits.is_closed() {
            log::warn!("task pool closed, task dropped");
            return;
        }
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
    }

    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}
