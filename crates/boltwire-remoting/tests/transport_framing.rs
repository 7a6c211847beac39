//! Byte-level behavior of the connection driver: partial reads, framing
//! errors, and real TCP.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod harness;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use boltwire_core::codec::CommandCodec;
use boltwire_core::{
    Command, CommandCode, DecodeLevel, Framing, Payload, ResponseStatus, SerializerId, SerializerRegistry,
};
use boltwire_remoting::services::EchoProcessor;
use boltwire_remoting::{RpcClient, RpcRequest, RpcServer};

use harness::quiet_config;

const WAIT: Duration = Duration::from_secs(2);

fn echo_server() -> RpcServer {
    let server = RpcServer::new(quiet_config()).unwrap();
    server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();
    server
}

fn frame(id: u32, framing: Framing, content: serde_json::Value) -> BytesMut {
    let reg = SerializerRegistry::with_defaults();
    let payload = Payload::new(Some("echo".into()), None, Some(content));
    let mut cmd = Command::request(CommandCode::RPC_REQUEST, id, framing, SerializerId::JSON, Some(2000), payload);
    cmd.serialize(&reg).unwrap();
    let mut buf = BytesMut::new();
    CommandCodec::default().encode(&cmd, &mut buf).unwrap();
    buf
}

async fn read_command(io: &mut DuplexStream) -> Command {
    let codec = CommandCodec::default();
    let mut buf = BytesMut::new();
    loop {
        if let Some(cmd) = codec.decode(&mut buf).unwrap() {
            return cmd;
        }
        let n = tokio::time::timeout(WAIT, io.read_buf(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0, "peer closed before a full frame");
    }
}

#[tokio::test]
async fn frame_split_across_writes_is_reassembled() {
    let server = echo_server();
    let (mut raw, b) = tokio::io::duplex(64 * 1024);
    server.attach_stream("raw:1", b);

    let bytes = frame(41, Framing::v2(true), json!({"k": "split"}));
    let (head, tail) = bytes.split_at(7);
    raw.write_all(head).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    raw.write_all(tail).await.unwrap();

    let mut resp = read_command(&mut raw).await;
    assert_eq!(resp.id, 41);
    assert_eq!(resp.status(), Some(ResponseStatus::Success));
    assert_eq!(resp.framing, Framing::v2(true));
    resp.advance_to(DecodeLevel::Full, &SerializerRegistry::with_defaults()).unwrap();
    assert_eq!(resp.payload.content(), Some(&json!({"k": "split"})));
}

#[tokio::test]
async fn v1_peer_is_answered_in_v1() {
    let server = echo_server();
    let (mut raw, b) = tokio::io::duplex(64 * 1024);
    server.attach_stream("raw:2", b);

    raw.write_all(&frame(3, Framing::V1, json!(1))).await.unwrap();
    let resp = read_command(&mut raw).await;
    assert_eq!(resp.framing, Framing::V1);
    assert_eq!(resp.status(), Some(ResponseStatus::Success));
}

#[tokio::test]
async fn bad_protocol_byte_closes_the_connection() {
    let server = echo_server();
    let (mut raw, b) = tokio::io::duplex(64 * 1024);
    let conn = server.attach_stream("raw:3", b);

    raw.write_all(&[0x09; 32]).await.unwrap();
    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(server.context().metrics().codec_errors.get(&[("kind", "CODEC")]), 1);

    let mut rest = Vec::new();
    let n = tokio::time::timeout(WAIT, raw.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn checksum_mismatch_closes_the_connection() {
    let server = echo_server();
    let (mut raw, b) = tokio::io::duplex(64 * 1024);
    let conn = server.attach_stream("raw:4", b);

    // one good frame, then a corrupted one
    raw.write_all(&frame(1, Framing::v2(true), json!("ok"))).await.unwrap();
    let resp = read_command(&mut raw).await;
    assert_eq!(resp.id, 1);

    let mut bad = frame(2, Framing::v2(true), json!("corrupt me"));
    let last = bad.len() - 6;
    bad[last] ^= 0x20;
    raw.write_all(&bad).await.unwrap();

    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(server.context().metrics().codec_errors.total(), 1);
}

#[tokio::test]
async fn crc_required_server_refuses_frames_without_trailer() {
    let mut cfg = quiet_config();
    cfg.protocol.crc = true;
    let server = RpcServer::new(cfg).unwrap();
    server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();
    let (mut raw, b) = tokio::io::duplex(64 * 1024);
    let conn = server.attach_stream("raw:5", b);

    raw.write_all(&frame(1, Framing::v2(true), json!("ok"))).await.unwrap();
    assert_eq!(read_command(&mut raw).await.id, 1);

    // same request with the crc switch cleared and the trailer dropped
    let mut stripped = frame(2, Framing::v2(true), json!("ok"));
    stripped.truncate(stripped.len() - 4);
    stripped[11] = 0;
    raw.write_all(&stripped).await.unwrap();

    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(server.context().metrics().codec_errors.get(&[("kind", "CODEC")]), 1);
}

#[tokio::test]
async fn tcp_round_trip_both_directions() {
    let mut cfg = quiet_config();
    cfg.server.listen = "127.0.0.1:0".into();
    let server = RpcServer::new(cfg).unwrap();
    server.register_user_processor(Arc::new(EchoProcessor::new("echo"))).unwrap();
    let addr = server.start().await.unwrap().to_string();

    let client = RpcClient::new(quiet_config()).unwrap();
    client.register_user_processor(Arc::new(EchoProcessor::new("back"))).unwrap();

    let out = client
        .invoke_sync(addr.as_str(), RpcRequest::from_value("echo", json!({"via": "tcp"})), WAIT)
        .await
        .unwrap();
    assert_eq!(out, json!({"via": "tcp"}));

    // cached: same connection on the next call
    let c1 = client.get_connection(&addr).await.unwrap();
    let c2 = client.get_connection(&addr).await.unwrap();
    assert_eq!(c1.id(), c2.id());

    // server-initiated call addressed by the client's remote address
    let accepted = server.connections();
    assert_eq!(accepted.len(), 1);
    let remote = accepted[0].remote_addr().to_owned();
    let back = server
        .invoke_sync(remote, RpcRequest::from_value("back", json!("pong")), WAIT)
        .await
        .unwrap();
    assert_eq!(back, json!("pong"));

    server.stop();
    tokio::time::timeout(WAIT, c1.closed()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // a closed cached connection is replaced on demand; nothing listens now
    assert!(client.get_connection(&addr).await.is_err());
}
