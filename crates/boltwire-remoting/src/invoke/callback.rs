use std::sync::Arc;

use serde_json::Value;

use boltwire_core::error::Result;

use crate::executor::Executor;

/// Receives the single outcome of a callback-mode rpc invocation.
///
/// Closures taking `Result<Value>` implement this and run on whichever task
/// resolves the call; use [`callback_on`] to run them on an executor.
pub trait InvokeCallback: Send + 'static {
    fn on_response(self: Box<Self>, result: Result<Value>);

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }
}

impl<F> InvokeCallback for F
where
    F: FnOnce(Result<Value>) + Send + 'static,
{
    fn on_response(self: Box<Self>, result: Result<Value>) {
        (*self)(result)
    }
}

/// A closure bound to an executor.
pub struct OnExecutor<F> {
    executor: Arc<dyn Executor>,
    f: F,
}

pub fn callback_on<F>(executor: Arc<dyn Executor>, f: F) -> OnExecutor<F>
where
    F: FnOnce(Result<Value>) + Send + 'static,
{
    OnExecutor { executor, f }
}

impl<F> InvokeCallback for OnExecutor<F>
where
    F: FnOnce(Result<Value>) + Send + 'static,
{
    fn on_response(self: Box<Self>, result: Result<Value>) {
        (self.f)(result)
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        Some(Arc::clone(&self.executor))
    }
}
