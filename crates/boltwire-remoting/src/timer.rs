//! Shared timer service for invoke timeouts.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use boltwire_core::error::{RemotingError, Result};

/// Schedules one-shot actions on the runtime that created it, from any thread.
#[derive(Debug, Clone)]
pub struct Timer {
    handle: Handle,
}

impl Timer {
    /// Bind to the current tokio runtime.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|_| RemotingError::Internal("timer requires a running tokio runtime".into()))?;
        Ok(Self { handle })
    }

    pub fn schedule<F>(&self, delay: Duration, action: F) -> Timeout
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        Timeout(task.abort_handle())
    }
}

/// Handle to a scheduled action. Dropping it does not cancel.
#[derive(Debug)]
pub struct Timeout(AbortHandle);

impl Timeout {
    pub fn cancel(self) {
        self.0.abort();
    }
}
