//! Rpc-level invocation: class-named requests with JSON-model content, and
//! responses turned into `Result<Value>`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{
    Command, CommandCode, DecodeLevel, HeaderMap, Payload, ResponseStatus, SerializerId, SerializerRegistry,
};

use crate::connection::Connection;
use crate::context::RemotingContext;
use crate::invoke::callback::InvokeCallback;
use crate::invoke::future::ResponseFuture;
use crate::invoke::remoting;
use crate::invoke::table::ResponseCallback;

#[derive(Debug, Clone)]
pub struct RpcRequest {
    class_name: String,
    header: HeaderMap,
    content: Value,
    serializer: Option<SerializerId>,
}

impl RpcRequest {
    pub fn new<T: Serialize>(class_name: impl Into<String>, content: &T) -> Result<Self> {
        let content = serde_json::to_value(content).map_err(|e| RemotingError::Serialization(e.to_string()))?;
        Ok(Self::from_value(class_name, content))
    }

    pub fn from_value(class_name: impl Into<String>, content: Value) -> Self {
        Self {
            class_name: class_name.into(),
            header: HeaderMap::new(),
            content,
            serializer: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// Override the connection's default serializer for this request.
    pub fn with_serializer(mut self, id: SerializerId) -> Self {
        self.serializer = Some(id);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn into_command(self, conn: &Connection, timeout: Option<Duration>) -> Command {
        let id = conn.next_request_id();
        let serializer = self
            .serializer
            .unwrap_or_else(|| conn.context().config().protocol.serializer_id());
        let header = (!self.header.is_empty()).then_some(self.header);
        let payload = Payload::new(Some(self.class_name), header, Some(self.content));
        match timeout {
            Some(t) => Command::request(
                CommandCode::RPC_REQUEST,
                id,
                conn.framing(),
                serializer,
                Some(u32::try_from(t.as_millis()).unwrap_or(u32::MAX)),
                payload,
            ),
            None => Command::oneway(CommandCode::RPC_REQUEST, id, conn.framing(), serializer, payload),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Turn a response command (real or synthetic) into the caller's result.
pub fn resolve_response(mut resp: Command, registry: &SerializerRegistry, timeout_ms: u64) -> Result<Value> {
    let status = resp.status().unwrap_or(ResponseStatus::Unknown);
    if status.is_success() {
        resp.advance_to(DecodeLevel::Full, registry)?;
        return Ok(resp.payload.take_content().unwrap_or(Value::Null));
    }

    let msg = match resp.cause() {
        Some(cause) => cause.to_owned(),
        None => match resp.advance_to(DecodeLevel::Full, registry) {
            Ok(()) => match resp.payload.content() {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => status.to_string(),
            },
            Err(_) => status.to_string(),
        },
    };

    Err(match status {
        ResponseStatus::Timeout => RemotingError::Timeout {
            id: resp.id,
            timeout_ms,
        },
        ResponseStatus::ConnectionClosed => RemotingError::ConnectionClosed(msg),
        ResponseStatus::ClientSendError => RemotingError::SendFailed(msg),
        ResponseStatus::ServerThreadpoolBusy => RemotingError::ServerBusy(msg),
        ResponseStatus::NoProcessor => RemotingError::NoProcessor(msg),
        status => RemotingError::ServerError { status, msg },
    })
}

/// Handle returned by [`invoke_with_future`].
#[derive(Debug)]
pub struct RpcResponseFuture {
    inner: ResponseFuture,
    ctx: Arc<RemotingContext>,
    timeout_ms: u64,
}

impl RpcResponseFuture {
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    pub fn is_done(&mut self) -> bool {
        self.inner.is_done()
    }

    pub async fn wait(self) -> Result<Value> {
        let resp = self.inner.wait().await;
        resolve_response(resp, self.ctx.serializers(), self.timeout_ms)
    }

    /// Wait at most `limit`; elapsing leaves the call pending.
    pub async fn wait_timeout(&mut self, limit: Duration) -> Result<Value> {
        let resp = self.inner.wait_timeout(limit).await?;
        resolve_response(resp, self.ctx.serializers(), self.timeout_ms)
    }
}

pub async fn oneway(conn: &Arc<Connection>, req: RpcRequest) -> Result<()> {
    let cmd = req.into_command(conn, None);
    remoting::oneway(conn, cmd).await
}

pub async fn invoke_sync(conn: &Arc<Connection>, req: RpcRequest, timeout: Duration) -> Result<Value> {
    let cmd = req.into_command(conn, Some(timeout));
    let resp = remoting::invoke_sync(conn, cmd, timeout).await?;
    resolve_response(resp, conn.context().serializers(), millis(timeout))
}

pub async fn invoke_with_future(conn: &Arc<Connection>, req: RpcRequest, timeout: Duration) -> Result<RpcResponseFuture> {
    let cmd = req.into_command(conn, Some(timeout));
    let inner = remoting::invoke_with_future(conn, cmd, timeout).await?;
    Ok(RpcResponseFuture {
        inner,
        ctx: Arc::clone(conn.context()),
        timeout_ms: millis(timeout),
    })
}

pub async fn invoke_with_callback<C>(conn: &Arc<Connection>, req: RpcRequest, callback: C, timeout: Duration) -> Result<()>
where
    C: InvokeCallback,
{
    let cmd = req.into_command(conn, Some(timeout));
    let callback: Box<dyn InvokeCallback> = Box::new(callback);
    let executor = callback.executor();
    let ctx = Arc::clone(conn.context());
    let timeout_ms = millis(timeout);
    let on_response = ResponseCallback::on(executor, move |resp| {
        callback.on_response(resolve_response(resp, ctx.serializers(), timeout_ms));
    });
    remoting::invoke_with_callback(conn, cmd, on_response, timeout).await
}
