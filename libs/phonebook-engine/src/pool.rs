use std::fmt;

use tokio::runtime::Handle;

/// Execution pool that runs RPC handlers on blocking worker threads.
///
/// Cloning is cheap; every clone schedules onto the same runtime.
#[derive(Clone)]
pub struct Pool {
    handle: Handle,
}

impl Pool {
    /// Use the blocking pool of an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `job` on a blocking worker. Jobs submitted after the runtime shut
    /// down are dropped without running.
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(job));
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("flavor", &self.handle.runtime_flavor())
            .finish()
    }
}
