use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Command, CommandCode, ResponseStatus};

use crate::connection::Connection;
use crate::dispatch::processor::{ProcessContext, RemotingProcessor};
use crate::dispatch::rpc_request::RpcRequestProcessor;
use crate::dispatch::rpc_response::RpcResponseProcessor;
use crate::dispatch::user::UserProcessor;
use crate::executor::{Executor, Rejected};
use crate::heartbeat::HeartbeatProcessor;

#[derive(Clone)]
struct Registration {
    processor: Arc<dyn RemotingProcessor>,
    /// `None`: run on the connection's I/O task.
    executor: Option<Arc<dyn Executor>>,
}

/// Two-level registry: command code -> processor, and (inside the rpc
/// request processor) class name -> user processor.
pub struct Dispatcher {
    processors: DashMap<CommandCode, Registration>,
    users: DashMap<String, Arc<dyn UserProcessor>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Registry with the built-in heartbeat, rpc request and rpc response processors.
    pub fn new() -> Self {
        let d = Self {
            processors: DashMap::new(),
            users: DashMap::new(),
        };
        d.register_processor(CommandCode::HEARTBEAT, Arc::new(HeartbeatProcessor), None);
        d.register_processor(CommandCode::RPC_REQUEST, Arc::new(RpcRequestProcessor), None);
        d.register_processor(CommandCode::RPC_RESPONSE, Arc::new(RpcResponseProcessor), None);
        d
    }

    /// Register (or replace) the processor for `code`.
    pub fn register_processor(
        &self,
        code: CommandCode,
        processor: Arc<dyn RemotingProcessor>,
        executor: Option<Arc<dyn Executor>>,
    ) {
        if self
            .processors
            .insert(code, Registration { processor, executor })
            .is_some()
        {
            tracing::warn!(%code, "processor replaced");
        }
    }

    pub fn register_user_processor(&self, processor: Arc<dyn UserProcessor>) -> Result<()> {
        let interest = processor.interest().to_owned();
        if interest.is_empty() {
            return Err(RemotingError::Config("user processor interest is empty".into()));
        }
        match self.users.entry(interest) {
            Entry::Occupied(e) => Err(RemotingError::Config(format!(
                "user processor for {} already registered",
                e.key()
            ))),
            Entry::Vacant(v) => {
                tracing::debug!(interest = %v.key(), "user processor registered");
                v.insert(processor);
                Ok(())
            }
        }
    }

    pub fn user_processor(&self, interest: &str) -> Option<Arc<dyn UserProcessor>> {
        self.users.get(interest).map(|e| Arc::clone(e.value()))
    }

    pub fn registered_codes(&self) -> Vec<CommandCode> {
        let mut codes: Vec<CommandCode> = self.processors.iter().map(|e| *e.key()).collect();
        codes.sort_by_key(|c| c.value());
        codes
    }

    pub fn registered_interests(&self) -> Vec<String> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    /// Route one inbound command by its code. Never fails the connection:
    /// routing problems become error replies (or are dropped for oneway).
    pub async fn dispatch(&self, conn: &Arc<Connection>, cmd: Command) {
        let arrive = Instant::now();
        let code = cmd.code;
        let ctx = ProcessContext::new(Arc::clone(conn), arrive);
        let metrics = conn.context().metrics();

        let Some(reg) = self.processors.get(&code).map(|e| e.value().clone()) else {
            let code_s = code.to_string();
            metrics.dispatch_rejections.inc(&[("code", code_s.as_str()), ("executor", "none")]);
            tracing::warn!(conn = conn.id(), id = cmd.id, %code, "no processor for command code");
            if cmd.expects_response() {
                let resp = Command::error_response(
                    &cmd,
                    ResponseStatus::NoProcessor,
                    format!("no processor for command code {code}"),
                );
                ctx.send_response(resp).await;
            }
            return;
        };

        match reg.executor {
            None => {
                if let Err(e) = reg.processor.process(ctx, cmd).await {
                    tracing::warn!(conn = conn.id(), %code, error = %e, "processor failed");
                }
            }
            Some(executor) => {
                let busy = cmd.expects_response().then(|| {
                    Command::error_response(
                        &cmd,
                        ResponseStatus::ServerThreadpoolBusy,
                        format!("executor {} is saturated", executor.name()),
                    )
                });
                let task_ctx = ctx.clone();
                let processor = reg.processor;
                let task = async move {
                    if let Err(e) = processor.process(task_ctx, cmd).await {
                        tracing::warn!(%code, error = %e, "processor failed");
                    }
                }
                .boxed();
                if let Err(Rejected(_)) = executor.execute(task) {
                    let code_s = code.to_string();
                    metrics
                        .dispatch_rejections
                        .inc(&[("code", code_s.as_str()), ("executor", executor.name())]);
                    tracing::warn!(conn = conn.id(), %code, executor = %executor.name(), "command rejected");
                    if let Some(busy) = busy {
                        ctx.send_response(busy).await;
                    }
                }
            }
        }
    }

    /// Dispatch commands decoded from one read, in arrival order.
    pub async fn dispatch_batch(&self, conn: &Arc<Connection>, cmds: Vec<Command>) {
        for cmd in cmds {
            self.dispatch(conn, cmd).await;
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("codes", &self.registered_codes())
            .field("interests", &self.registered_interests())
            .finish()
    }
}
