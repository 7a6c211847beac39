//! Wire vector tests (hand-assembled frames for both protocols).

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use bytes::BytesMut;

use boltwire_core::codec::CommandCodec;
use boltwire_core::protocol::CommandType;

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

fn type_str(ty: CommandType) -> &'static str {
    match ty {
        CommandType::Response => "RESPONSE",
        CommandType::Request => "REQUEST",
        CommandType::RequestOneway => "REQUEST_ONEWAY",
    }
}

#[test]
fn wire_vectors() {
    let files = [
        "v1_heartbeat.json",
        "v1_oneway_request.json",
        "v2_crc_response.json",
        "v2_plain_request.json",
        "v2_crc_corrupt.json",
        "bad_protocol.json",
        "bad_switch.json",
        "truncated.json",
        "oneway_heartbeat.json",
    ];
    let codec = CommandCodec::default();

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let mut buf = BytesMut::from(&raw[..]);
        let res = codec.decode(&mut buf);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.kind().as_str(), err.code, "vector={}", v.description);
            assert!(e.is_fatal(), "vector={}", v.description);
            continue;
        }

        let ex = v.expect.expect("missing expect block");
        if ex.get("need_more").is_some() {
            assert!(res.unwrap().is_none(), "vector={}", v.description);
            assert_eq!(buf.len(), raw.len(), "vector={}", v.description);
            continue;
        }

        let cmd = res.unwrap().expect("expected a full frame");
        assert!(buf.is_empty(), "vector={} left trailing bytes", v.description);

        assert_eq!(cmd.framing.protocol.code() as u64, ex["protocol"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(type_str(cmd.command_type()), ex["type"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(cmd.code.value() as u64, ex["code"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(cmd.id as u64, ex["id"].as_u64().unwrap(), "vector={}", v.description);

        if let Some(status) = ex.get("status") {
            assert_eq!(cmd.status().unwrap().as_str(), status.as_str().unwrap(), "vector={}", v.description);
        }
        if let Some(t) = ex.get("timeout_ms") {
            assert_eq!(cmd.timeout_ms().map(u64::from), t.as_u64(), "vector={}", v.description);
        }

        let p = &cmd.payload;
        assert_eq!(p.class_bytes().len() as u64, ex["class_len"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(p.header_bytes().len() as u64, ex["header_len"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(p.content_bytes().len() as u64, ex["content_len"].as_u64().unwrap(), "vector={}", v.description);
    }
}
