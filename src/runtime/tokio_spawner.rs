//! Tokio runtime spawner implementation.

use std::future::Future;

use tokio::runtime::{Handle, Runtime};

use crate::core::Spawn;

/// Spawner that launches runner drivers and tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    /// Spawner on an existing runtime.
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner on the runtime the caller is currently inside.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Build a dedicated multi-threaded runtime and a spawner bound to it.
    ///
    /// The caller owns the runtime and must keep it alive while runs are in
    /// progress; spawned work stops when it is dropped.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the runtime.
    pub fn with_worker_threads(worker_threads: usize) -> Result<(Self, Runtime), std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("task-pool-worker")
            .enable_all()
            .build()?;
        Ok((Self::new(runtime.handle().clone()), runtime))
    }

    /// Handle of the runtime tasks are spawned on.
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Spawn for TokioSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(fut));
    }
}
