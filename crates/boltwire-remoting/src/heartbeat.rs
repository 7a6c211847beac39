//! Heartbeat liveness protocol.
//!
//! Client side: when a connection has been idle for `heartbeat.idle_interval_ms`
//! the driver calls [`trigger`], which sends a heartbeat through the ordinary
//! correlation table with its own timeout. The completion callback resets or
//! bumps the failure counter; reaching `heartbeat.max_failures` consecutive
//! failures closes the connection.
//!
//! Receiving side: [`HeartbeatProcessor`] answers immediately on the I/O task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use boltwire_core::error::Result;
use boltwire_core::{Command, CommandKind, Payload, ResponseStatus};

use crate::connection::Connection;
use crate::dispatch::processor::{ProcessContext, RemotingProcessor};
use crate::dispatch::rpc_response;
use crate::invoke::remoting;
use crate::invoke::table::ResponseCallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Sent { id: u32 },
    Closing,
}

#[derive(Debug)]
struct MonitorInner {
    state: HeartbeatState,
    failures: u32,
}

/// Connection-scoped heartbeat attributes.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    enabled: AtomicBool,
    max_failures: u32,
    inner: Mutex<MonitorInner>,
}

impl HeartbeatMonitor {
    pub fn new(enabled: bool, max_failures: u32) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            max_failures: max_failures.max(1),
            inner: Mutex::new(MonitorInner {
                state: HeartbeatState::Idle,
                failures: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn state(&self) -> HeartbeatState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// `Idle -> Sent`. Refused while a heartbeat is in flight or closing.
    pub fn begin(&self, id: u32) -> bool {
        let mut g = self.lock();
        if g.state != HeartbeatState::Idle {
            return false;
        }
        g.state = HeartbeatState::Sent { id };
        true
    }

    /// `Sent -> Idle`, failure counter reset.
    pub fn on_ack(&self, id: u32) {
        let mut g = self.lock();
        if g.state == (HeartbeatState::Sent { id }) {
            g.state = HeartbeatState::Idle;
            g.failures = 0;
        }
    }

    /// `Sent -> Idle` with the counter bumped, or `-> Closing` at the
    /// threshold. Returns true when the connection must be closed.
    pub fn on_failure(&self, id: u32) -> bool {
        let mut g = self.lock();
        if g.state != (HeartbeatState::Sent { id }) {
            return g.state == HeartbeatState::Closing;
        }
        g.failures += 1;
        if g.failures >= self.max_failures {
            g.state = HeartbeatState::Closing;
            true
        } else {
            g.state = HeartbeatState::Idle;
            false
        }
    }
}

/// Send one heartbeat if the connection's state machine allows it.
pub async fn trigger(conn: &Arc<Connection>) {
    let hb = conn.heartbeat();
    if !hb.is_enabled() || conn.is_closed() {
        return;
    }
    if hb.state() == HeartbeatState::Closing {
        conn.close("heartbeat failures exceeded");
        return;
    }

    let id = conn.next_request_id();
    if !hb.begin(id) {
        tracing::debug!(conn = conn.id(), "heartbeat still in flight, skipping");
        return;
    }

    let timeout_ms = conn.context().config().heartbeat.timeout_ms;
    let cmd = Command::heartbeat(id, conn.framing(), u32::try_from(timeout_ms).ok());
    let weak = Arc::downgrade(conn);
    let callback = ResponseCallback::inline(move |resp: Command| {
        if let Some(conn) = weak.upgrade() {
            on_outcome(&conn, id, &resp);
        }
    });

    conn.context().metrics().heartbeats.inc(&[("result", "sent")]);
    tracing::trace!(conn = conn.id(), id, "heartbeat sent");
    if let Err(e) = remoting::invoke_with_callback(conn, cmd, callback, Duration::from_millis(timeout_ms)).await {
        tracing::debug!(conn = conn.id(), id, error = %e, "heartbeat not sent");
        if hb.on_failure(id) {
            conn.close("heartbeat failures exceeded");
        }
    }
}

fn on_outcome(conn: &Arc<Connection>, id: u32, resp: &Command) {
    let hb = conn.heartbeat();
    let metrics = conn.context().metrics();
    let status = resp.status().unwrap_or(ResponseStatus::Unknown);
    if status.is_success() {
        hb.on_ack(id);
        metrics.heartbeats.inc(&[("result", "ack")]);
        return;
    }

    metrics.heartbeats.inc(&[("result", "failed")]);
    let close = hb.on_failure(id);
    tracing::warn!(
        conn = conn.id(),
        remote = %conn.remote_addr(),
        id,
        %status,
        failures = hb.failures(),
        "heartbeat failed"
    );
    if close {
        metrics.heartbeats.inc(&[("result", "closed")]);
        conn.close("heartbeat failures exceeded");
    }
}

/// Answers heartbeats and completes heartbeat acks, inline on the I/O task.
#[derive(Debug, Default)]
pub struct HeartbeatProcessor;

#[async_trait]
impl RemotingProcessor for HeartbeatProcessor {
    async fn process(&self, ctx: ProcessContext, cmd: Command) -> Result<()> {
        match cmd.kind {
            CommandKind::Heartbeat { .. } => {
                tracing::trace!(conn = ctx.connection().id(), id = cmd.id, "heartbeat received");
                let ack = Command::response_to(&cmd, ResponseStatus::Success, Payload::empty());
                ctx.send_response(ack).await;
                Ok(())
            }
            CommandKind::HeartbeatAck { .. } => {
                rpc_response::complete_pending(ctx.connection(), cmd);
                Ok(())
            }
            _ => {
                tracing::warn!(conn = ctx.connection().id(), id = cmd.id, "non-heartbeat command on heartbeat code");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_the_counter() {
        let m = HeartbeatMonitor::new(true, 3);
        assert!(m.begin(1));
        assert!(!m.on_failure(1));
        assert_eq!(m.failures(), 1);
        assert_eq!(m.state(), HeartbeatState::Idle);

        assert!(m.begin(2));
        m.on_ack(2);
        assert_eq!(m.failures(), 0);
        assert_eq!(m.state(), HeartbeatState::Idle);
    }

    #[test]
    fn threshold_moves_to_closing() {
        let m = HeartbeatMonitor::new(true, 3);
        for id in 1..=2 {
            assert!(m.begin(id));
            assert!(!m.on_failure(id));
        }
        assert!(m.begin(3));
        assert!(m.on_failure(3));
        assert_eq!(m.state(), HeartbeatState::Closing);
        assert!(!m.begin(4));
    }

    #[test]
    fn one_heartbeat_in_flight_at_a_time() {
        let m = HeartbeatMonitor::new(true, 3);
        assert!(m.begin(1));
        assert!(!m.begin(2));
        // stale outcomes for other ids are ignored
        m.on_ack(7);
        assert_eq!(m.state(), HeartbeatState::Sent { id: 1 });
    }
}
