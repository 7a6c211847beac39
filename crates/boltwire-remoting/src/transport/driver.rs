//! Per-connection I/O tasks.
//!
//! The read task decodes every complete frame in the buffer, dispatches the
//! batch, and owns the idle deadline (heartbeat on the client, close on the
//! server). The write task drains the outbound queue. A framing error is
//! fatal: the connection is closed and all pending calls resolve with
//! `CONNECTION_CLOSED`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::connection::{Connection, Role};
use crate::context::RemotingContext;
use crate::heartbeat;

const READ_BUF_CAPACITY: usize = 8 * 1024;

/// Wrap a byte stream in a [`Connection`] and start its read and write tasks.
/// Must be called inside a tokio runtime.
pub fn spawn_connection<IO>(io: IO, remote: String, role: Role, ctx: Arc<RemotingContext>) -> Arc<Connection>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (conn, out_rx) = Connection::new(remote, role, ctx);
    let (rd, wr) = tokio::io::split(io);
    tracing::debug!(conn = conn.id(), remote = %conn.remote_addr(), role = role.as_str(), "connection opened");
    tokio::spawn(write_loop(Arc::clone(&conn), wr, out_rx));
    tokio::spawn(read_loop(Arc::clone(&conn), rd));
    conn
}

fn idle_interval(conn: &Connection) -> Option<Duration> {
    let cfg = conn.context().config();
    match conn.role() {
        Role::Client if conn.heartbeat().is_enabled() => Some(Duration::from_millis(cfg.heartbeat.idle_interval_ms)),
        Role::Server if cfg.server.idle_close => Some(Duration::from_millis(cfg.server.idle_timeout_ms)),
        _ => None,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

async fn read_loop<R>(conn: Arc<Connection>, mut rd: R)
where
    R: AsyncRead + Unpin,
{
    let ctx = Arc::clone(conn.context());
    let idle = idle_interval(&conn);
    let mut closed = conn.subscribe_closed();
    let mut buf = BytesMut::with_capacity(READ_BUF_CAPACITY);
    let mut idle_mark = Instant::now();
    conn.touch();

    loop {
        if conn.is_closed() {
            break;
        }
        let deadline = idle.map(|d| conn.last_activity().max(idle_mark) + d);
        tokio::select! {
            _ = closed.changed() => break,
            res = rd.read_buf(&mut buf) => match res {
                Ok(0) => {
                    conn.close("peer closed");
                    break;
                }
                Ok(_) => {
                    conn.touch();
                    let mut batch = Vec::new();
                    let fatal = loop {
                        match ctx.codec().decode(&mut buf) {
                            Ok(Some(cmd)) => batch.push(cmd),
                            Ok(None) => break None,
                            Err(e) => break Some(e),
                        }
                    };
                    ctx.dispatcher().dispatch_batch(&conn, batch).await;
                    if let Some(e) = fatal {
                        ctx.metrics().codec_errors.inc(&[("kind", e.kind().as_str())]);
                        tracing::warn!(conn = conn.id(), remote = %conn.remote_addr(), error = %e, "framing error, closing");
                        conn.close("framing error");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(conn = conn.id(), error = %e, "read failed");
                    conn.close("read failed");
                    break;
                }
            },
            _ = sleep_until(deadline) => {
                idle_mark = Instant::now();
                match conn.role() {
                    Role::Client => heartbeat::trigger(&conn).await,
                    Role::Server => {
                        tracing::info!(conn = conn.id(), remote = %conn.remote_addr(), "idle timeout");
                        conn.close("idle timeout");
                        break;
                    }
                }
            }
        }
    }
    conn.close("read task ended");
}

async fn write_loop<W>(conn: Arc<Connection>, mut wr: W, mut out_rx: mpsc::Receiver<bytes::Bytes>)
where
    W: AsyncWrite + Unpin,
{
    let mut closed = conn.subscribe_closed();
    while !conn.is_closed() {
        tokio::select! {
            biased;
            _ = closed.changed() => break,
            next = out_rx.recv() => match next {
                Some(bytes) => {
                    if let Err(e) = wr.write_all(&bytes).await {
                        tracing::debug!(conn = conn.id(), error = %e, "write failed");
                        conn.close("write failed");
                        break;
                    }
                    conn.touch();
                }
                None => break,
            },
        }
    }
    let _ = wr.shutdown().await;
}
