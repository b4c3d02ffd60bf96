//! Caller-owned bounded worker pool for interactive polling

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::CredentialError;

/// Bounded pool that device-code polling runs on.
///
/// The pool belongs to the caller: the resolver never shuts it down, and a
/// pool that was shut down is refused before any network call.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool of `size` concurrent workers on the current tokio runtime.
    ///
    /// Panics when called outside a runtime, like `tokio::spawn`.
    pub fn new(size: usize) -> Self {
        Self::with_handle(Handle::current(), size)
    }

    pub fn with_handle(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a task.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work. Tasks already running are not interrupted.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run `task` on a free worker, waiting for one if the pool is busy.
    pub(crate) async fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, CredentialError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CredentialError::ExecutorUnavailable)?;
        Ok(self.handle.spawn(async move {
            let _permit = permit;
            task.await
        }))
    }
}
