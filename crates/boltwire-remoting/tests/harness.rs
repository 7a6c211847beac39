//! Shared fixtures: a client and a server joined by an in-memory duplex.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use boltwire_core::error::{RemotingError, Result};
use boltwire_remoting::config::RemotingConfig;
use boltwire_remoting::dispatch::{BizContext, UserProcessor};
use boltwire_remoting::executor::Executor;
use boltwire_remoting::{Connection, RpcClient, RpcServer};

pub const SERVER_ADDR: &str = "server:12200";
pub const CLIENT_ADDR: &str = "client:40000";

/// Small pools, no heartbeat, no idle close.
pub fn quiet_config() -> RemotingConfig {
    let mut cfg = RemotingConfig::default();
    cfg.heartbeat.enabled = false;
    cfg.server.idle_close = false;
    cfg.executor.worker_threads = 2;
    cfg.executor.queue_capacity = 16;
    cfg
}

pub struct Pair {
    pub client: RpcClient,
    pub server: RpcServer,
    /// Client side of the link.
    pub conn: Arc<Connection>,
    /// Server side of the link.
    pub server_conn: Arc<Connection>,
}

pub fn pair_with(client_cfg: RemotingConfig, server_cfg: RemotingConfig) -> Pair {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let server = RpcServer::new(server_cfg).unwrap();
    let client = RpcClient::new(client_cfg).unwrap();
    let server_conn = server.attach_stream(CLIENT_ADDR, b);
    let conn = client.attach_stream(SERVER_ADDR, a);
    Pair {
        client,
        server,
        conn,
        server_conn,
    }
}

pub fn pair() -> Pair {
    pair_with(quiet_config(), quiet_config())
}

/// Poll `cond` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Configurable test handler.
pub struct Handler {
    pub interest: &'static str,
    pub delay: Duration,
    /// Sleep the worker thread instead of yielding.
    pub block: bool,
    pub fail: bool,
    pub panic: bool,
    pub discard: bool,
    pub executor: Option<Arc<dyn Executor>>,
    pub calls: Arc<AtomicUsize>,
}

impl Handler {
    pub fn new(interest: &'static str) -> Self {
        Self {
            interest,
            delay: Duration::ZERO,
            block: false,
            fail: false,
            panic: false,
            discard: true,
            executor: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl UserProcessor for Handler {
    fn interest(&self) -> &str {
        self.interest
    }

    async fn handle_request(&self, _ctx: &BizContext, request: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            if self.block {
                std::thread::sleep(self.delay);
            } else {
                tokio::time::sleep(self.delay).await;
            }
        }
        if self.panic {
            panic!("handler blew up");
        }
        if self.fail {
            return Err(RemotingError::Internal("handler refused".into()));
        }
        Ok(request)
    }

    fn timeout_discard(&self) -> bool {
        self.discard
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.executor.clone()
    }
}
