//! Server facade: accept loop, accepted-connection registry, and
//! server-initiated invocations addressed by remote address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::CommandCode;

use crate::config::RemotingConfig;
use crate::connection::{Connection, Role};
use crate::context::RemotingContext;
use crate::dispatch::{RemotingProcessor, UserProcessor};
use crate::executor::Executor;
use crate::invoke::{rpc, InvokeCallback, RpcRequest, RpcResponseFuture};
use crate::resolver::{AddressResolver, Target};
use crate::transport::spawn_connection;

pub struct RpcServer {
    ctx: Arc<RemotingContext>,
    connections: Arc<DashMap<String, Arc<Connection>>>,
    shutdown: watch::Sender<bool>,
}

impl RpcServer {
    /// Must be called inside a tokio runtime.
    pub fn new(cfg: RemotingConfig) -> Result<Self> {
        Ok(Self::with_context(RemotingContext::new(cfg)?))
    }

    pub fn with_context(ctx: Arc<RemotingContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            connections: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    pub fn context(&self) -> &Arc<RemotingContext> {
        &self.ctx
    }

    /// Bind `server.listen` and accept in the background. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listen = self.ctx.config().server.listen.clone();
        let listener = TcpListener::bind(&listen)
            .await
            .map_err(|e| RemotingError::Config(format!("bind {listen} failed: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| RemotingError::Internal(format!("local_addr: {e}")))?;
        tracing::info!(addr = %local, "rpc server listening");

        let ctx = Arc::clone(&self.ctx);
        let connections = Arc::clone(&self.connections);
        let mut stop = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(%peer, error = %e, "set_nodelay failed");
                            }
                            register(&connections, stream, peer.to_string(), &ctx);
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    },
                }
            }
            tracing::info!(addr = %local, "rpc server stopped accepting");
        });
        Ok(local)
    }

    /// Serve an already-established stream as if it had been accepted.
    pub fn attach_stream<IO>(&self, remote: &str, io: IO) -> Arc<Connection>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        register(&self.connections, io, remote.to_owned(), &self.ctx)
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn register_processor(
        &self,
        code: CommandCode,
        processor: Arc<dyn RemotingProcessor>,
        executor: Option<Arc<dyn Executor>>,
    ) {
        self.ctx.dispatcher().register_processor(code, processor, executor);
    }

    pub fn register_user_processor(&self, processor: Arc<dyn UserProcessor>) -> Result<()> {
        self.ctx.dispatcher().register_user_processor(processor)
    }

    pub fn register_default_executor(&self, executor: Arc<dyn Executor>) {
        self.ctx.register_default_executor(executor);
    }

    pub async fn oneway(&self, target: impl Into<Target>, req: RpcRequest) -> Result<()> {
        let conn = target.into().connection(self).await?;
        rpc::oneway(&conn, req).await
    }

    pub async fn invoke_sync(&self, target: impl Into<Target>, req: RpcRequest, timeout: Duration) -> Result<Value> {
        let conn = target.into().connection(self).await?;
        rpc::invoke_sync(&conn, req, timeout).await
    }

    pub async fn invoke_with_future(
        &self,
        target: impl Into<Target>,
        req: RpcRequest,
        timeout: Duration,
    ) -> Result<RpcResponseFuture> {
        let conn = target.into().connection(self).await?;
        rpc::invoke_with_future(&conn, req, timeout).await
    }

    pub async fn invoke_with_callback<C: InvokeCallback>(
        &self,
        target: impl Into<Target>,
        req: RpcRequest,
        callback: C,
        timeout: Duration,
    ) -> Result<()> {
        let conn = target.into().connection(self).await?;
        rpc::invoke_with_callback(&conn, req, callback, timeout).await
    }

    /// Stop accepting and close every accepted connection.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        for conn in self.connections() {
            conn.close("server stopped");
        }
        self.connections.clear();
    }
}

fn register<IO>(
    connections: &Arc<DashMap<String, Arc<Connection>>>,
    io: IO,
    remote: String,
    ctx: &Arc<RemotingContext>,
) -> Arc<Connection>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let conn = spawn_connection(io, remote.clone(), Role::Server, Arc::clone(ctx));
    connections.insert(remote.clone(), Arc::clone(&conn));

    let connections = Arc::clone(connections);
    let watched = Arc::clone(&conn);
    tokio::spawn(async move {
        watched.closed().await;
        connections.remove_if(&remote, |_, c| c.id() == watched.id());
    });
    conn
}

#[async_trait]
impl AddressResolver for RpcServer {
    async fn resolve(&self, addr: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(addr)
            .map(|e| Arc::clone(e.value()))
            .filter(|c| !c.is_closed())
            .ok_or_else(|| RemotingError::ConnectFailed(format!("no live connection from {addr}")))
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("connections", &self.connections.len())
            .finish()
    }
}
