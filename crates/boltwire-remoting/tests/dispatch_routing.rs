//! Command-code routing, executor saturation and timeout discard.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use boltwire_core::error::{RemotingError, Result};
use boltwire_core::{Command, CommandCode, JsonSerializer, Payload, ResponseStatus, SerializerId, SerializerRegistry};
use boltwire_remoting::dispatch::rpc_request::RpcRequestProcessor;
use boltwire_remoting::dispatch::{ProcessContext, RemotingProcessor};
use boltwire_remoting::executor::{Executor, WorkerPool};
use boltwire_remoting::invoke::remoting;
use boltwire_remoting::services::EchoProcessor;
use boltwire_remoting::{Connection, RemotingContext, RpcClient, RpcRequest, RpcServer};

use harness::{eventually, pair, quiet_config, Handler, CLIENT_ADDR, SERVER_ADDR};

const WAIT: Duration = Duration::from_secs(2);
const CUSTOM: CommandCode = CommandCode(7);
const MISSING: CommandCode = CommandCode(99);

fn raw(conn: &Connection, code: CommandCode, oneway: bool) -> Command {
    let payload = Payload::new(None, None, Some(json!("ping")));
    let id = conn.next_request_id();
    if oneway {
        Command::oneway(code, id, conn.framing(), SerializerId::JSON, payload)
    } else {
        Command::request(code, id, conn.framing(), SerializerId::JSON, Some(2000), payload)
    }
}

/// Answers every request on its code with "pong".
struct Pong;

#[async_trait]
impl RemotingProcessor for Pong {
    async fn process(&self, ctx: ProcessContext, cmd: Command) -> Result<()> {
        let reply = Command::response_to(&cmd, ResponseStatus::Success, Payload::new(None, None, Some(json!("pong"))));
        ctx.send_response(reply).await;
        Ok(())
    }
}

#[tokio::test]
async fn unknown_code_gets_no_processor() {
    let p = pair();
    let resp = remoting::invoke_sync(&p.conn, raw(&p.conn, MISSING, false), WAIT).await.unwrap();
    assert_eq!(resp.status(), Some(ResponseStatus::NoProcessor));

    let metrics = p.server.context().metrics();
    assert_eq!(metrics.dispatch_rejections.get(&[("code", "99"), ("executor", "none")]), 1);
    assert_eq!(metrics.error_responses.get(&[("status", ResponseStatus::NoProcessor.as_str())]), 1);
}

#[tokio::test]
async fn unknown_code_oneway_is_dropped_silently() {
    let p = pair();
    remoting::oneway(&p.conn, raw(&p.conn, MISSING, true)).await.unwrap();

    let server = Arc::clone(p.server.context());
    assert!(eventually(WAIT, || server.metrics().dispatch_rejections.total() == 1).await);
    assert_eq!(server.metrics().error_responses.total(), 0);

    // nothing came back, and the link still works
    assert_eq!(p.client.context().metrics().unmatched_responses.total(), 0);
    p.server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();
    let out = p.client.invoke_sync(&p.conn, RpcRequest::from_value("echo", json!(5)), WAIT).await;
    assert_eq!(out.unwrap(), json!(5));
}

#[tokio::test]
async fn codes_route_independently() {
    let p = pair();
    let pool: Arc<dyn Executor> = Arc::new(WorkerPool::new("pong-pool", 1, 8).unwrap());
    p.server.register_processor(CUSTOM, Arc::new(Pong), Some(pool));
    p.server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();

    let resp = remoting::invoke_sync(&p.conn, raw(&p.conn, CUSTOM, false), WAIT).await.unwrap();
    assert_eq!(resp.status(), Some(ResponseStatus::Success));
    let out = p.client.invoke_sync(&p.conn, RpcRequest::from_value("echo", json!("rpc")), WAIT).await;
    assert_eq!(out.unwrap(), json!("rpc"));

    let codes = p.server.context().dispatcher().registered_codes();
    assert_eq!(codes, vec![CommandCode::HEARTBEAT, CommandCode::RPC_REQUEST, CommandCode::RPC_RESPONSE, CUSTOM]);
}

#[tokio::test]
async fn duplicate_user_processor_is_refused() {
    let p = pair();
    p.server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();
    let err = p
        .server
        .register_user_processor(Arc::new(EchoProcessor::new("echo")))
        .unwrap_err();
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[tokio::test]
async fn saturated_executor_answers_busy() {
    let p = pair();
    let pool: Arc<dyn Executor> = Arc::new(WorkerPool::new("tiny", 1, 0).unwrap());
    let mut held = Handler::new("held");
    held.delay = Duration::from_millis(300);
    held.discard = false;
    held.executor = Some(pool);
    let calls = held.calls();
    p.server.register_user_processor(Arc::new(held)).unwrap();

    let first = p
        .client
        .invoke_with_future(&p.conn, RpcRequest::from_value("held", json!(1)), WAIT)
        .await
        .unwrap();
    assert!(eventually(WAIT, || calls.load(Ordering::SeqCst) == 1).await);

    let err = p
        .client
        .invoke_sync(&p.conn, RpcRequest::from_value("held", json!(2)), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, RemotingError::ServerBusy(_)), "{err:?}");
    assert_eq!(first.wait().await.unwrap(), json!(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        p.server.context().metrics().error_responses.get(&[("status", ResponseStatus::ServerThreadpoolBusy.as_str())]),
        1
    );
}

#[tokio::test]
async fn busy_rejections_are_labelled_with_the_request_code() {
    let p = pair();
    p.server.register_processor(CUSTOM, Arc::new(RpcRequestProcessor), None);
    let pool: Arc<dyn Executor> = Arc::new(WorkerPool::new("tiny", 1, 0).unwrap());
    let mut held = Handler::new("held");
    held.delay = Duration::from_millis(300);
    held.discard = false;
    held.executor = Some(pool);
    let calls = held.calls();
    p.server.register_user_processor(Arc::new(held)).unwrap();

    let request = |n: i64| {
        let payload = Payload::new(Some("held".into()), None, Some(json!(n)));
        Command::request(CUSTOM, p.conn.next_request_id(), p.conn.framing(), SerializerId::JSON, Some(2000), payload)
    };
    let first = remoting::invoke_with_future(&p.conn, request(1), WAIT).await.unwrap();
    assert!(eventually(WAIT, || calls.load(Ordering::SeqCst) == 1).await);

    let resp = remoting::invoke_sync(&p.conn, request(2), WAIT).await.unwrap();
    assert_eq!(resp.status(), Some(ResponseStatus::ServerThreadpoolBusy));
    assert_eq!(first.wait().await.status(), Some(ResponseStatus::Success));

    let metrics = p.server.context().metrics();
    assert_eq!(metrics.dispatch_rejections.get(&[("code", "7"), ("executor", "tiny")]), 1);
    assert_eq!(metrics.dispatch_rejections.get(&[("code", "1"), ("executor", "tiny")]), 0);
}

#[tokio::test]
async fn expired_requests_are_discarded_before_the_handler() {
    let p = pair();
    let pool: Arc<dyn Executor> = Arc::new(WorkerPool::new("single", 1, 8).unwrap());

    let mut blocker = Handler::new("blocker");
    blocker.delay = Duration::from_millis(300);
    blocker.block = true;
    blocker.discard = false;
    blocker.executor = Some(Arc::clone(&pool));
    let blocker_calls = blocker.calls();

    let mut quick = Handler::new("quick");
    quick.executor = Some(pool);
    let quick_calls = quick.calls();

    p.server.register_user_processor(Arc::new(blocker)).unwrap();
    p.server.register_user_processor(Arc::new(quick)).unwrap();

    let first = p
        .client
        .invoke_with_future(&p.conn, RpcRequest::from_value("blocker", json!(0)), WAIT)
        .await
        .unwrap();
    assert!(eventually(WAIT, || blocker_calls.load(Ordering::SeqCst) == 1).await);

    // queued behind the blocked worker past its own deadline
    let err = p
        .client
        .invoke_sync(&p.conn, RpcRequest::from_value("quick", json!(1)), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, RemotingError::Timeout { .. }), "{err:?}");

    assert_eq!(first.wait().await.unwrap(), json!(0));
    let server = Arc::clone(p.server.context());
    assert!(eventually(WAIT, || server.metrics().discarded_requests.get(&[("class", "quick")]) == 1).await);
    assert_eq!(quick_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_request_serializer_still_gets_an_error_reply() {
    let mut reg = SerializerRegistry::with_defaults();
    reg.register(SerializerId(42), Arc::new(JsonSerializer));
    let client = RpcClient::with_context(RemotingContext::with_serializers(quiet_config(), reg).unwrap());
    let server = RpcServer::new(quiet_config()).unwrap();
    server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();

    let (a, b) = tokio::io::duplex(64 * 1024);
    server.attach_stream(CLIENT_ADDR, b);
    let conn = client.attach_stream(SERVER_ADDR, a);

    let started = tokio::time::Instant::now();
    let req = RpcRequest::from_value("echo", json!({"n": 1})).with_serializer(SerializerId(42));
    let err = client.invoke_sync(&conn, req, WAIT).await.unwrap_err();
    match err {
        RemotingError::ServerError { status, .. } => assert_eq!(status, ResponseStatus::ServerDeserializeException),
        other => panic!("unexpected {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(conn.invoke_table().is_empty());
    assert!(!conn.is_closed());
}

