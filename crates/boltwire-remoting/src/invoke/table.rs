//! Per-connection correlation table: request id -> pending call.
//!
//! Resolution is decided by `take`: whichever of response arrival, timer
//! fire, or connection-close sweep removes the id first owns the call and
//! completes it. The losers find nothing and do nothing. No lock is held
//! while a call completes.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::Command;

use crate::executor::{Executor, Rejected};
use crate::timer::Timeout;

type CallbackFn = Box<dyn FnOnce(Command) + Send>;

/// Response delivery for a callback-mode call. The closure is held in a
/// mutex so the table stays `Sync`.
pub struct ResponseCallback {
    f: Mutex<CallbackFn>,
    executor: Option<Arc<dyn Executor>>,
}

impl ResponseCallback {
    /// Run on whichever thread resolves the call.
    pub fn inline<F>(f: F) -> Self
    where
        F: FnOnce(Command) + Send + 'static,
    {
        Self {
            f: Mutex::new(Box::new(f)),
            executor: None,
        }
    }

    /// Run on `executor` (or inline when `None`).
    pub fn on<F>(executor: Option<Arc<dyn Executor>>, f: F) -> Self
    where
        F: FnOnce(Command) + Send + 'static,
    {
        Self {
            f: Mutex::new(Box::new(f)),
            executor,
        }
    }

    fn run(self, response: Command) {
        let f = self.f.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.executor {
            None => f(response),
            Some(executor) => {
                let task = async move { f(response) }.boxed();
                if let Err(Rejected(task)) = executor.execute(task) {
                    tracing::warn!(executor = %executor.name(), "callback executor rejected task, running inline");
                    // the task has no await points; one poll runs it to completion
                    let _ = task.now_or_never();
                }
            }
        }
    }
}

pub(crate) enum Completion {
    Waiter(oneshot::Sender<Command>),
    Callback(ResponseCallback),
}

/// Bookkeeping for one outstanding request.
pub struct PendingCall {
    id: u32,
    completion: Completion,
    timeout: Option<Timeout>,
    created: Instant,
}

impl PendingCall {
    pub(crate) fn new(id: u32, completion: Completion) -> Self {
        Self {
            id,
            completion,
            timeout: None,
            created: Instant::now(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn has_callback(&self) -> bool {
        matches!(self.completion, Completion::Callback(_))
    }

    /// Deliver the one and only outcome for this call.
    pub fn complete(mut self, response: Command) {
        if let Some(t) = self.timeout.take() {
            t.cancel();
        }
        match self.completion {
            Completion::Waiter(tx) => {
                // receiver gone: the caller stopped waiting
                let _ = tx.send(response);
            }
            Completion::Callback(cb) => cb.run(response),
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("callback", &self.has_callback())
            .field("timer", &self.timeout.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct InvokeTable {
    calls: DashMap<u32, PendingCall>,
}

impl InvokeTable {
    pub fn new() -> Self {
        Self { calls: DashMap::new() }
    }

    pub(crate) fn insert(&self, call: PendingCall) -> Result<()> {
        match self.calls.entry(call.id) {
            Entry::Occupied(_) => Err(RemotingError::Internal(format!("request id {} already pending", call.id))),
            Entry::Vacant(v) => {
                v.insert(call);
                Ok(())
            }
        }
    }

    /// Remove and return the call for `id`; the single winner of any race.
    pub fn take(&self, id: u32) -> Option<PendingCall> {
        self.calls.remove(&id).map(|(_, call)| call)
    }

    /// Attach a scheduled timeout, or cancel it if the call already resolved.
    pub(crate) fn attach_timeout(&self, id: u32, timeout: Timeout) {
        match self.calls.get_mut(&id) {
            Some(mut call) => call.timeout = Some(timeout),
            None => timeout.cancel(),
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Take every pending call (connection teardown).
    pub fn drain(&self) -> Vec<PendingCall> {
        let ids: Vec<u32> = self.calls.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.take(id)).collect()
    }
}
