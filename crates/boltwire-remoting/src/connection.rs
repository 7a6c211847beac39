//! A live connection: outbound queue, correlation table, and attributes.
//!
//! The I/O driver (`transport`) owns the socket halves; everything else talks
//! to the peer through this handle. Closing is idempotent and resolves every
//! pending call with `CONNECTION_CLOSED`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Command, Framing, ResponseStatus};

use crate::context::RemotingContext;
use crate::heartbeat::HeartbeatMonitor;
use crate::invoke::table::InvokeTable;

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

pub struct Connection {
    id: u64,
    remote: String,
    role: Role,
    framing: Framing,
    ctx: Arc<RemotingContext>,
    outbound: mpsc::Sender<Bytes>,
    table: InvokeTable,
    next_id: AtomicU32,
    heartbeat: HeartbeatMonitor,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    opened: Instant,
    /// Millis since `opened` of the last read or write.
    last_activity: AtomicU64,
}

impl Connection {
    /// Build the handle and the receiving end of its outbound queue.
    pub(crate) fn new(
        remote: String,
        role: Role,
        ctx: Arc<RemotingContext>,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let cfg = ctx.config();
        let (outbound, out_rx) = mpsc::channel(cfg.executor.outbound_queue);
        let (close_tx, _) = watch::channel(false);
        let heartbeat = HeartbeatMonitor::new(
            role == Role::Client && cfg.heartbeat.enabled,
            cfg.heartbeat.max_failures,
        );
        let conn = Arc::new(Self {
            id: CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed),
            remote,
            role,
            framing: cfg.protocol.framing(),
            outbound,
            table: InvokeTable::new(),
            next_id: AtomicU32::new(1),
            heartbeat,
            closed: AtomicBool::new(false),
            close_tx,
            opened: Instant::now(),
            last_activity: AtomicU64::new(0),
            ctx,
        });
        conn.ctx.metrics().active_connections.inc(&[("role", role.as_str())]);
        (conn, out_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Framing for commands originated on this connection.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn context(&self) -> &Arc<RemotingContext> {
        &self.ctx
    }

    pub fn invoke_table(&self) -> &InvokeTable {
        &self.table
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Next request id not currently pending on this connection.
    pub fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.table.contains(id) {
                return id;
            }
        }
    }

    /// Serialize payload segments and frame `cmd`.
    pub fn encode(&self, cmd: &mut Command) -> Result<Bytes> {
        cmd.serialize(self.ctx.serializers())?;
        let mut buf = BytesMut::new();
        self.ctx.codec().encode(cmd, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Queue already-framed bytes for the writer.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(RemotingError::ConnectionClosed(format!("connection {} is closed", self.id)));
        }
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| RemotingError::SendFailed(format!("connection {} writer is gone", self.id)))
    }

    pub async fn send_command(&self, mut cmd: Command) -> Result<()> {
        let bytes = self.encode(&mut cmd)?;
        self.send(bytes).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close once; later calls are no-ops. Every pending call is resolved
    /// with `CONNECTION_CLOSED`.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(true);
        let metrics = self.ctx.metrics();
        metrics.active_connections.dec(&[("role", self.role.as_str())]);

        let pending = self.table.drain();
        tracing::info!(conn = self.id, remote = %self.remote, reason, pending = pending.len(), "connection closed");
        for call in pending {
            let id = call.id();
            metrics.resolutions.inc(&[("outcome", "closed")]);
            call.complete(Command::synthetic_response(
                id,
                ResponseStatus::ConnectionClosed,
                format!("connection closed: {reason}"),
                Some(self.remote.clone()),
            ));
        }
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    pub(crate) fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    pub(crate) fn touch(&self) {
        let ms = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity.store(ms, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_activity.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .field("pending", &self.table.len())
            .finish()
    }
}
