// ============================================================================
// File: src/task.rs
// ----------------------------------------------------------------------------
// Task handles for blocking operations. Each operation runs on tokio's
// blocking pool and hands the caller a handle to await.
// ============================================================================

use log::debug;

use crate::error::DeployResult;

/// Handle to a spawned operation
pub type AsyncTask<T> = tokio::task::JoinHandle<T>;

/// Builder for a blocking operation spawned onto the runtime
pub struct AsyncTaskBuilder<F> {
    work: F,
    name: &'static str,
}

impl<F, T> AsyncTaskBuilder<F>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    pub fn new(work: F) -> Self {
        Self {
            work,
            name: "operation",
        }
    }

    /// Name used in log lines
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Spawn onto the blocking pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> AsyncTask<T> {
        debug!("Spawning {} on blocking pool", self.name);
        tokio::task::spawn_blocking(self.work)
    }
}

/// Await a task and flatten a join failure into the operation's error
pub async fn join<T>(task: AsyncTask<DeployResult<T>>) -> DeployResult<T> {
    task.await?
}
