//! Client facade: connection cache by address plus the four invocation modes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

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

pub struct RpcClient {
    ctx: Arc<RemotingContext>,
    connections: DashMap<String, Arc<Connection>>,
    connecting: Mutex<()>,
}

impl RpcClient {
    /// Must be called inside a tokio runtime.
    pub fn new(cfg: RemotingConfig) -> Result<Self> {
        Ok(Self::with_context(RemotingContext::new(cfg)?))
    }

    pub fn with_context(ctx: Arc<RemotingContext>) -> Self {
        Self {
            ctx,
            connections: DashMap::new(),
            connecting: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<RemotingContext> {
        &self.ctx
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.ctx.config().client.default_timeout_ms)
    }

    /// Open a new TCP connection to `addr` (not cached).
    pub async fn connect(&self, addr: &str) -> Result<Arc<Connection>> {
        let limit = Duration::from_millis(self.ctx.config().client.connect_timeout_ms);
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| RemotingError::ConnectFailed(format!("connect to {addr} timed out after {}ms", limit.as_millis())))?
            .map_err(|e| RemotingError::ConnectFailed(format!("connect to {addr} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "set_nodelay failed");
        }
        Ok(spawn_connection(stream, addr.to_owned(), Role::Client, Arc::clone(&self.ctx)))
    }

    /// Cache `io` as the connection for `addr`, replacing any previous one.
    pub fn attach_stream<IO>(&self, addr: &str, io: IO) -> Arc<Connection>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = spawn_connection(io, addr.to_owned(), Role::Client, Arc::clone(&self.ctx));
        if let Some(old) = self.connections.insert(addr.to_owned(), Arc::clone(&conn)) {
            old.close("replaced");
        }
        conn
    }

    /// Cached connection for `addr`, connecting on miss or when the cached one is closed.
    pub async fn get_connection(&self, addr: &str) -> Result<Arc<Connection>> {
        if let Some(conn) = self.cached(addr) {
            return Ok(conn);
        }
        let _guard = self.connecting.lock().await;
        if let Some(conn) = self.cached(addr) {
            return Ok(conn);
        }
        let conn = self.connect(addr).await?;
        self.connections.insert(addr.to_owned(), Arc::clone(&conn));
        Ok(conn)
    }

    fn cached(&self, addr: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(addr)
            .map(|e| Arc::clone(e.value()))
            .filter(|c| !c.is_closed())
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

    pub fn close_connection(&self, addr: &str) {
        if let Some((_, conn)) = self.connections.remove(addr) {
            conn.close("closed by client");
        }
    }

    pub fn shutdown(&self) {
        let addrs: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for addr in addrs {
            self.close_connection(&addr);
        }
    }
}

#[async_trait]
impl AddressResolver for RpcClient {
    async fn resolve(&self, addr: &str) -> Result<Arc<Connection>> {
        self.get_connection(addr).await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connections", &self.connections.len())
            .finish()
    }
}
