//! Worker pools for handler bodies and callbacks.
//!
//! A `WorkerPool` owns a dedicated multi-thread runtime with named threads, so
//! work submitted to it never runs on a connection's I/O task. Admission is
//! bounded by a semaphore sized `threads + queue_capacity`; a submission that
//! finds no permit is rejected and handed back to the caller.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;

use boltwire_core::error::{RemotingError, Result};

/// Unit of work accepted by an executor.
pub type Task = BoxFuture<'static, ()>;

/// A refused submission; carries the task back so the caller can decide.
pub struct Rejected(pub Task);

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

pub trait Executor: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, task: Task) -> std::result::Result<(), Rejected>;
}

pub struct WorkerPool {
    name: String,
    handle: Handle,
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, threads: usize, queue_capacity: usize) -> Result<Self> {
        let name = name.into();
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(name.clone())
            .enable_all()
            .build()
            .map_err(|e| RemotingError::Internal(format!("worker pool {name} failed to start: {e}")))?;
        let capacity = threads + queue_capacity;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            name,
        })
    }

    /// Admitted tasks (running or queued) the pool can still take.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: Task) -> std::result::Result<(), Rejected> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(Rejected(task));
        };
        self.handle.spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Pools are often dropped from inside another runtime.
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_on_named_threads() {
        let pool = WorkerPool::new("pool-a", 1, 0).unwrap();
        let (tx, rx) = oneshot::channel();
        pool.execute(
            async move {
                let _ = tx.send(std::thread::current().name().map(str::to_owned));
            }
            .boxed(),
        )
        .unwrap();
        assert_eq!(rx.await.unwrap().as_deref(), Some("pool-a"));
    }

    #[tokio::test]
    async fn rejects_beyond_capacity_and_recovers() {
        let pool = WorkerPool::new("pool-b", 1, 1).unwrap();
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        for _ in 0..2 {
            let mut rx = release_rx.clone();
            pool.execute(
                async move {
                    let _ = rx.wait_for(|v| *v).await;
                }
                .boxed(),
            )
            .unwrap();
        }
        assert!(pool.execute(async {}.boxed()).is_err());

        release_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while pool.available() < pool.capacity() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(pool.execute(async {}.boxed()).is_ok());
    }
}
