//! Command-level invocation modes over one connection.
//!
//! Every mode frames the command before registering anything, so a local
//! serialization failure never leaves a pending call behind. Once a call is
//! registered it is resolved exactly once: by the response, by its timer, or by
//! the connection-close sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Command, ResponseStatus};

use crate::connection::Connection;
use crate::invoke::future::ResponseFuture;
use crate::invoke::table::{Completion, PendingCall, ResponseCallback};

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Insert a pending call, closing the window where the connection shuts down
/// between the liveness check and the insert.
fn register(conn: &Connection, id: u32, completion: Completion) -> Result<()> {
    if conn.is_closed() {
        return Err(RemotingError::ConnectionClosed(format!("connection {} is closed", conn.id())));
    }
    conn.invoke_table().insert(PendingCall::new(id, completion))?;
    if conn.is_closed() {
        if let Some(call) = conn.invoke_table().take(id) {
            call.complete(Command::synthetic_response(
                id,
                ResponseStatus::ConnectionClosed,
                "connection closed while registering",
                Some(conn.remote_addr().to_owned()),
            ));
        }
    }
    Ok(())
}

/// Resolve `id` with a synthetic response if it is still pending.
fn resolve_locally(conn: &Connection, id: u32, status: ResponseStatus, outcome: &str, cause: String) {
    if let Some(call) = conn.invoke_table().take(id) {
        conn.context().metrics().resolutions.inc(&[("outcome", outcome)]);
        call.complete(Command::synthetic_response(
            id,
            status,
            cause,
            Some(conn.remote_addr().to_owned()),
        ));
    }
}

fn schedule_timeout(conn: &Arc<Connection>, id: u32, timeout: Duration) {
    let weak = Arc::downgrade(conn);
    let handle = conn.context().timer().schedule(timeout, move || {
        if let Some(conn) = weak.upgrade() {
            tracing::debug!(conn = conn.id(), id, "invoke timed out");
            resolve_locally(
                &conn,
                id,
                ResponseStatus::Timeout,
                "timeout",
                format!("no response within {}ms", millis(timeout)),
            );
        }
    });
    conn.invoke_table().attach_timeout(id, handle);
}

/// Fire and forget: no pending call, no response is ever correlated.
pub async fn oneway(conn: &Arc<Connection>, mut cmd: Command) -> Result<()> {
    let bytes = conn.encode(&mut cmd)?;
    conn.context().metrics().invocations.inc(&[("mode", "oneway")]);
    conn.send(bytes).await
}

/// Queue `bytes` for a registered call. The call's timer is already armed, so
/// a queue that stays full past `timeout` leaves resolution to the timer.
async fn send_registered(conn: &Arc<Connection>, id: u32, bytes: bytes::Bytes, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, conn.send(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            resolve_locally(conn, id, ResponseStatus::ClientSendError, "send_error", e.to_string());
            Err(e)
        }
        Err(_) => {
            tracing::debug!(conn = conn.id(), id, "outbound queue full until the deadline");
            Ok(())
        }
    }
}

/// Send and suspend the calling task until the response or the deadline.
/// On deadline the id is retired; a late response is dropped as unmatched.
///
/// The deadline is a timer armed at registration, so dropping this future
/// early still retires the id on time.
pub async fn invoke_sync(conn: &Arc<Connection>, mut cmd: Command, timeout: Duration) -> Result<Command> {
    let id = cmd.id;
    let bytes = conn.encode(&mut cmd)?;
    let (tx, rx) = oneshot::channel();
    register(conn, id, Completion::Waiter(tx))?;
    schedule_timeout(conn, id, timeout);
    conn.context().metrics().invocations.inc(&[("mode", "sync")]);

    send_registered(conn, id, bytes, timeout).await?;

    match rx.await {
        Ok(resp) if resp.status() == Some(ResponseStatus::Timeout) => Err(RemotingError::Timeout {
            id,
            timeout_ms: millis(timeout),
        }),
        Ok(resp) => Ok(resp),
        Err(_) => Err(RemotingError::ConnectionClosed(format!(
            "pending call {id} dropped without a response"
        ))),
    }
}

/// Send and return a handle. A timeout armed at registration resolves the
/// handle with a `TIMEOUT` response if nothing arrives in time.
pub async fn invoke_with_future(conn: &Arc<Connection>, mut cmd: Command, timeout: Duration) -> Result<ResponseFuture> {
    let id = cmd.id;
    let bytes = conn.encode(&mut cmd)?;
    let (tx, rx) = oneshot::channel();
    register(conn, id, Completion::Waiter(tx))?;
    schedule_timeout(conn, id, timeout);
    conn.context().metrics().invocations.inc(&[("mode", "future")]);

    // a send failure is delivered through the handle
    let _ = send_registered(conn, id, bytes, timeout).await;
    Ok(ResponseFuture::new(id, rx))
}

/// Send; the callback receives the one outcome (response, timeout, send
/// failure or close), on its executor if it has one.
pub async fn invoke_with_callback(
    conn: &Arc<Connection>,
    mut cmd: Command,
    callback: ResponseCallback,
    timeout: Duration,
) -> Result<()> {
    let id = cmd.id;
    let bytes = conn.encode(&mut cmd)?;
    register(conn, id, Completion::Callback(callback))?;
    schedule_timeout(conn, id, timeout);
    conn.context().metrics().invocations.inc(&[("mode", "callback")]);

    // a send failure is delivered to the callback
    let _ = send_registered(conn, id, bytes, timeout).await;
    Ok(())
}
