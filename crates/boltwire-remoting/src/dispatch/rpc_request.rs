//! Request processing with staged decode.
//!
//! On the I/O task only the class name (and, when an executor selector is
//! involved, the header) is decoded. Content is decoded on the chosen
//! executor, after the timeout-discard check.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;

use boltwire_core::error::Result;
use boltwire_core::{Command, DecodeLevel, Payload, ResponseStatus};

use crate::dispatch::processor::{ProcessContext, RemotingProcessor};
use crate::dispatch::user::{BizContext, UserProcessor};
use crate::executor::Rejected;

#[derive(Debug, Default)]
pub struct RpcRequestProcessor;

async fn reply_error(ctx: &ProcessContext, req: &Command, status: ResponseStatus, msg: String) {
    if req.is_oneway() {
        tracing::debug!(conn = ctx.connection().id(), id = req.id, %status, %msg, "oneway request failed");
        return;
    }
    ctx.send_response(Command::error_response(req, status, msg)).await;
}

#[async_trait]
impl RemotingProcessor for RpcRequestProcessor {
    async fn process(&self, ctx: ProcessContext, mut cmd: Command) -> Result<()> {
        let rctx = Arc::clone(ctx.context());

        if let Err(e) = cmd.advance_to(DecodeLevel::ClassOnly, rctx.serializers()) {
            reply_error(&ctx, &cmd, ResponseStatus::ServerDeserializeException, e.to_string()).await;
            return Ok(());
        }
        let Some(class) = cmd.class_name().map(str::to_owned) else {
            reply_error(&ctx, &cmd, ResponseStatus::ServerException, "request carries no class name".into()).await;
            return Ok(());
        };
        let Some(user) = rctx.dispatcher().user_processor(&class) else {
            tracing::warn!(conn = ctx.connection().id(), id = cmd.id, %class, "no user processor");
            reply_error(
                &ctx,
                &cmd,
                ResponseStatus::ServerException,
                format!("no user processor registered for class {class}"),
            )
            .await;
            return Ok(());
        };

        if user.process_in_io_thread() {
            do_process(ctx, user, cmd).await;
            return Ok(());
        }

        let executor = match user.executor_selector() {
            Some(selector) => {
                if let Err(e) = cmd.advance_to(DecodeLevel::ClassAndHeader, rctx.serializers()) {
                    reply_error(&ctx, &cmd, ResponseStatus::ServerDeserializeException, e.to_string()).await;
                    return Ok(());
                }
                selector.select(&class, cmd.payload.header()).or_else(|| user.executor())
            }
            None => user.executor(),
        }
        .unwrap_or_else(|| rctx.default_executor());

        let busy = (!cmd.is_oneway()).then(|| {
            Command::error_response(
                &cmd,
                ResponseStatus::ServerThreadpoolBusy,
                format!("executor {} is saturated", executor.name()),
            )
        });
        let code = cmd.code.to_string();
        let task_ctx = ctx.clone();
        let task = async move { do_process(task_ctx, user, cmd).await }.boxed();
        if let Err(Rejected(_)) = executor.execute(task) {
            rctx.metrics()
                .dispatch_rejections
                .inc(&[("code", code.as_str()), ("executor", executor.name())]);
            tracing::warn!(conn = ctx.connection().id(), %class, executor = %executor.name(), "request rejected");
            if let Some(busy) = busy {
                ctx.send_response(busy).await;
            }
        }
        Ok(())
    }
}

async fn do_process(ctx: ProcessContext, user: Arc<dyn UserProcessor>, mut cmd: Command) {
    let rctx = Arc::clone(ctx.context());
    let class = cmd.class_name().unwrap_or_default().to_owned();

    if user.timeout_discard() && ctx.is_request_timeout(&cmd) {
        rctx.metrics().discarded_requests.inc(&[("class", class.as_str())]);
        tracing::warn!(
            conn = ctx.connection().id(),
            id = cmd.id,
            %class,
            timeout_ms = ?cmd.timeout_ms(),
            waited_ms = u64::try_from(ctx.arrive_time().elapsed().as_millis()).unwrap_or(u64::MAX),
            "request timed out before processing, discarded"
        );
        return;
    }

    if let Err(e) = cmd.advance_to(DecodeLevel::Full, rctx.serializers()) {
        reply_error(&ctx, &cmd, ResponseStatus::ServerDeserializeException, e.to_string()).await;
        return;
    }

    let request = cmd.payload.take_content().unwrap_or(Value::Null);
    let biz = BizContext::new(
        Arc::clone(ctx.connection()),
        cmd.id,
        class.clone(),
        cmd.payload.header().cloned().unwrap_or_default(),
        ctx.arrive_time(),
        cmd.timeout_ms(),
    );

    let started = Instant::now();
    let outcome = AssertUnwindSafe(user.handle_request(&biz, request))
        .catch_unwind()
        .await;
    rctx.metrics()
        .handler_duration
        .observe(&[("class", class.as_str())], started.elapsed());

    let reply = match outcome {
        Ok(Ok(value)) => {
            if cmd.is_oneway() {
                return;
            }
            Command::response_to(&cmd, ResponseStatus::Success, Payload::new(None, None, Some(value)))
        }
        Ok(Err(e)) => {
            tracing::debug!(conn = ctx.connection().id(), id = cmd.id, %class, error = %e, "handler failed");
            if cmd.is_oneway() {
                return;
            }
            Command::error_response(&cmd, ResponseStatus::ServerException, e.to_string())
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_owned());
            tracing::error!(conn = ctx.connection().id(), id = cmd.id, %class, %msg, "handler panicked");
            if cmd.is_oneway() {
                return;
            }
            Command::error_response(&cmd, ResponseStatus::ServerException, msg)
        }
    };
    ctx.send_response(reply).await;
}
