use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use boltwire_core::error::Result;
use boltwire_core::Command;

use crate::connection::Connection;
use crate::dispatch::processor::{ProcessContext, RemotingProcessor};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Hand a response to its pending call. Responses whose id is no longer
/// pending (late, or never sent) are counted and dropped.
pub fn complete_pending(conn: &Arc<Connection>, mut cmd: Command) {
    cmd.set_response_meta(conn.remote_addr(), now_millis());
    let metrics = conn.context().metrics();
    match conn.invoke_table().take(cmd.id) {
        Some(call) => {
            metrics.resolutions.inc(&[("outcome", "response")]);
            call.complete(cmd);
        }
        None => {
            let code = cmd.code.to_string();
            metrics.unmatched_responses.inc(&[("code", code.as_str())]);
            tracing::debug!(conn = conn.id(), id = cmd.id, %code, "response for unknown id dropped");
        }
    }
}

#[derive(Debug, Default)]
pub struct RpcResponseProcessor;

#[async_trait]
impl RemotingProcessor for RpcResponseProcessor {
    async fn process(&self, ctx: ProcessContext, cmd: Command) -> Result<()> {
        complete_pending(ctx.connection(), cmd);
        Ok(())
    }
}
