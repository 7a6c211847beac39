use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use boltwire_core::error::Result;
use boltwire_core::{Command, Payload, ResponseStatus};

use crate::connection::Connection;
use crate::context::RemotingContext;

/// Handles every inbound command carrying one command code.
#[async_trait]
pub trait RemotingProcessor: Send + Sync {
    async fn process(&self, ctx: ProcessContext, cmd: Command) -> Result<()>;
}

/// Per-command processing context: the connection and the arrival time.
#[derive(Clone)]
pub struct ProcessContext {
    conn: Arc<Connection>,
    arrive: Instant,
}

impl ProcessContext {
    pub fn new(conn: Arc<Connection>, arrive: Instant) -> Self {
        Self { conn, arrive }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn context(&self) -> &Arc<RemotingContext> {
        self.conn.context()
    }

    pub fn arrive_time(&self) -> Instant {
        self.arrive
    }

    /// True when the caller's declared timeout has already elapsed since arrival.
    pub fn is_request_timeout(&self, cmd: &Command) -> bool {
        match cmd.timeout_ms() {
            Some(ms) => self.arrive.elapsed() > Duration::from_millis(u64::from(ms)),
            None => false,
        }
    }

    /// Write a reply. If the reply cannot be serialized, a
    /// `SERVER_SERIALIZE_EXCEPTION` reply is sent in its place. A request
    /// serializer unknown here is answered with the configured default one,
    /// and as a last resort the status goes out with no content.
    pub async fn send_response(&self, mut resp: Command) {
        if self.conn.is_closed() {
            tracing::debug!(conn = self.conn.id(), id = resp.id, "connection closed, reply dropped");
            return;
        }

        let rctx = self.context();
        if !rctx.serializers().contains(resp.serializer) {
            tracing::debug!(
                conn = self.conn.id(),
                id = resp.id,
                serializer = %resp.serializer,
                "reply serializer not registered, using default"
            );
            resp.serializer = rctx.config().protocol.serializer_id();
        }

        let bytes = match self.conn.encode(&mut resp) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(conn = self.conn.id(), id = resp.id, error = %e, "reply serialization failed");
                let mut fallback = Command::error_response(
                    &resp,
                    ResponseStatus::ServerSerializeException,
                    format!("reply serialization failed: {e}"),
                );
                match self.conn.encode(&mut fallback) {
                    Ok(b) => {
                        resp = fallback;
                        b
                    }
                    Err(e) => {
                        tracing::error!(conn = self.conn.id(), id = resp.id, error = %e, "error reply not encodable, sending bare status");
                        let mut bare = Command::response_to(&resp, ResponseStatus::ServerSerializeException, Payload::empty());
                        match self.conn.encode(&mut bare) {
                            Ok(b) => {
                                resp = bare;
                                b
                            }
                            Err(e) => {
                                tracing::error!(conn = self.conn.id(), id = resp.id, error = %e, "bare status not encodable");
                                return;
                            }
                        }
                    }
                }
            }
        };

        if let Some(status) = resp.status().filter(|s| !s.is_success()) {
            self.context()
                .metrics()
                .error_responses
                .inc(&[("status", status.as_str())]);
        }
        if let Err(e) = self.conn.send(bytes).await {
            tracing::debug!(conn = self.conn.id(), id = resp.id, error = %e, "reply not sent");
        }
    }
}
