//! Application handlers keyed by request class name.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use boltwire_core::error::Result;
use boltwire_core::HeaderMap;

use crate::connection::Connection;
use crate::executor::Executor;

/// Handles requests whose class name equals [`UserProcessor::interest`].
///
/// Returning `Err` (or panicking) answers the caller with
/// `SERVER_EXCEPTION`; for oneway requests the outcome is only logged.
#[async_trait]
pub trait UserProcessor: Send + Sync {
    fn interest(&self) -> &str;

    async fn handle_request(&self, ctx: &BizContext, request: Value) -> Result<Value>;

    /// Run on the connection's I/O task instead of an executor.
    fn process_in_io_thread(&self) -> bool {
        false
    }

    /// Drop requests whose client timeout has passed before the handler runs.
    fn timeout_discard(&self) -> bool {
        true
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }

    fn executor_selector(&self) -> Option<Arc<dyn ExecutorSelector>> {
        None
    }
}

/// Picks an executor from the request header. `None` falls back to the
/// processor's own executor, then the default one.
pub trait ExecutorSelector: Send + Sync {
    fn select(&self, class_name: &str, header: Option<&HeaderMap>) -> Option<Arc<dyn Executor>>;
}

/// What a handler may know about the request it is serving.
#[derive(Debug, Clone)]
pub struct BizContext {
    conn: Arc<Connection>,
    id: u32,
    class_name: String,
    header: HeaderMap,
    arrive: Instant,
    timeout_ms: Option<u32>,
}

impl BizContext {
    pub(crate) fn new(
        conn: Arc<Connection>,
        id: u32,
        class_name: String,
        header: HeaderMap,
        arrive: Instant,
        timeout_ms: Option<u32>,
    ) -> Self {
        Self {
            conn,
            id,
            class_name,
            header,
            arrive,
            timeout_ms,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn remote_addr(&self) -> &str {
        self.conn.remote_addr()
    }

    pub fn request_id(&self) -> u32 {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    pub fn arrive_time(&self) -> Instant {
        self.arrive
    }

    pub fn client_timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    pub fn is_request_timeout(&self) -> bool {
        self.timeout_ms
            .is_some_and(|ms| self.arrive.elapsed() > Duration::from_millis(u64::from(ms)))
    }
}
