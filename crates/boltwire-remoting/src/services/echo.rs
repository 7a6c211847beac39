use async_trait::async_trait;
use serde_json::Value;

use boltwire_core::error::Result;

use crate::dispatch::{BizContext, UserProcessor};

/// Replies with the request content unchanged. Useful to prove routing end to end.
pub struct EchoProcessor {
    interest: String,
}

impl EchoProcessor {
    pub fn new(interest: impl Into<String>) -> Self {
        Self {
            interest: interest.into(),
        }
    }
}

#[async_trait]
impl UserProcessor for EchoProcessor {
    fn interest(&self) -> &str {
        &self.interest
    }

    async fn handle_request(&self, ctx: &BizContext, request: Value) -> Result<Value> {
        tracing::trace!(remote = %ctx.remote_addr(), id = ctx.request_id(), "echo");
        Ok(request)
    }
}
