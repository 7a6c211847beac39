//! Command envelope and its three-segment lazy payload.
//!
//! A decoded command keeps its class/header/content segments as raw bytes and
//! turns them into values one stage at a time:
//! `Undecoded -> ClassKnown -> HeaderKnown -> FullyDecoded`.
//! Routing only needs the class name, executor selection only needs the
//! header, and content is decoded last (if the request is not rejected or
//! discarded first).

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{RemotingError, Result};
use crate::protocol::status::ResponseStatus;
use crate::protocol::{CommandCode, CommandType, Framing};
use crate::serializer::{SerializerId, SerializerRegistry};

/// String map carried in the header segment.
pub type HeaderMap = BTreeMap<String, String>;

/// How far a payload should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecodeLevel {
    ClassOnly,
    ClassAndHeader,
    Full,
}

impl DecodeLevel {
    fn stage(self) -> DecodeStage {
        match self {
            DecodeLevel::ClassOnly => DecodeStage::ClassKnown,
            DecodeLevel::ClassAndHeader => DecodeStage::HeaderKnown,
            DecodeLevel::Full => DecodeStage::FullyDecoded,
        }
    }
}

/// How far a payload has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DecodeStage {
    #[default]
    Undecoded,
    ClassKnown,
    HeaderKnown,
    FullyDecoded,
}

/// Class name, header map and content, each held as a value, as bytes, or both.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    class_name: Option<String>,
    header: Option<HeaderMap>,
    content: Option<Value>,
    class_bytes: Option<Bytes>,
    header_bytes: Option<Bytes>,
    content_bytes: Option<Bytes>,
    stage: DecodeStage,
}

impl Payload {
    /// Payload with no segments at all (heartbeats, bare acks).
    pub fn empty() -> Self {
        Self {
            stage: DecodeStage::FullyDecoded,
            ..Self::default()
        }
    }

    /// Outbound payload built from in-memory values.
    pub fn new(class_name: Option<String>, header: Option<HeaderMap>, content: Option<Value>) -> Self {
        Self {
            class_name,
            header,
            content,
            stage: DecodeStage::FullyDecoded,
            ..Self::default()
        }
    }

    /// Inbound payload holding raw segments; nothing decoded yet.
    pub fn from_wire(class_bytes: Bytes, header_bytes: Bytes, content_bytes: Bytes) -> Self {
        let non_empty = |b: Bytes| if b.is_empty() { None } else { Some(b) };
        Self {
            class_bytes: non_empty(class_bytes),
            header_bytes: non_empty(header_bytes),
            content_bytes: non_empty(content_bytes),
            stage: DecodeStage::Undecoded,
            ..Self::default()
        }
    }

    pub fn stage(&self) -> DecodeStage {
        self.stage
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn header(&self) -> Option<&HeaderMap> {
        self.header.as_ref()
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn take_content(&mut self) -> Option<Value> {
        self.content.take()
    }

    pub fn class_bytes(&self) -> &[u8] {
        self.class_bytes.as_deref().unwrap_or_default()
    }

    pub fn header_bytes(&self) -> &[u8] {
        self.header_bytes.as_deref().unwrap_or_default()
    }

    pub fn content_bytes(&self) -> &[u8] {
        self.content_bytes.as_deref().unwrap_or_default()
    }

    /// Decode segments in order until `level` is reached. A stage that fails
    /// leaves the payload at the previous stage.
    pub fn advance_to(
        &mut self,
        level: DecodeLevel,
        serializer: SerializerId,
        registry: &SerializerRegistry,
    ) -> Result<()> {
        let target = level.stage();
        while self.stage < target {
            match self.stage {
                DecodeStage::Undecoded => {
                    if self.class_name.is_none() {
                        if let Some(b) = &self.class_bytes {
                            let name = std::str::from_utf8(b).map_err(|e| {
                                RemotingError::Deserialization(format!("class name not utf-8: {e}"))
                            })?;
                            self.class_name = Some(name.to_owned());
                        }
                    }
                    self.stage = DecodeStage::ClassKnown;
                }
                DecodeStage::ClassKnown => {
                    if self.header.is_none() {
                        if let Some(b) = &self.header_bytes {
                            self.header = Some(decode_header_map(b.clone())?);
                        }
                    }
                    self.stage = DecodeStage::HeaderKnown;
                }
                DecodeStage::HeaderKnown => {
                    if self.content.is_none() {
                        if let Some(b) = &self.content_bytes {
                            let value = registry.get(serializer).and_then(|s| s.deserialize(b)).map_err(
                                |e| match e {
                                    RemotingError::Serialization(msg) => RemotingError::Deserialization(msg),
                                    other => other,
                                },
                            )?;
                            self.content = Some(value);
                        }
                    }
                    self.stage = DecodeStage::FullyDecoded;
                }
                DecodeStage::FullyDecoded => break,
            }
        }
        Ok(())
    }

    /// Produce any missing byte segment from its in-memory value.
    /// Segments whose value is absent, or whose bytes already exist, are skipped.
    pub fn serialize(&mut self, serializer: SerializerId, registry: &SerializerRegistry) -> Result<()> {
        if self.class_bytes.is_none() {
            if let Some(name) = &self.class_name {
                self.class_bytes = Some(Bytes::copy_from_slice(name.as_bytes()));
            }
        }
        if self.header_bytes.is_none() {
            if let Some(header) = &self.header {
                if !header.is_empty() {
                    self.header_bytes = Some(encode_header_map(header)?);
                }
            }
        }
        if self.content_bytes.is_none() {
            if let Some(content) = &self.content {
                let bytes = registry.get(serializer)?.serialize(content)?;
                self.content_bytes = Some(Bytes::from(bytes));
            }
        }
        Ok(())
    }
}

/// Encode a header map as `[u32 len][key][u32 len][value]...` (big-endian).
pub fn encode_header_map(map: &HeaderMap) -> Result<Bytes> {
    let mut out = BytesMut::new();
    for (k, v) in map {
        for s in [k, v] {
            let len = u32::try_from(s.len())
                .map_err(|_| RemotingError::Serialization("header entry too long".into()))?;
            out.put_u32(len);
            out.put_slice(s.as_bytes());
        }
    }
    Ok(out.freeze())
}

pub fn decode_header_map(mut buf: Bytes) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    while buf.has_remaining() {
        let key = read_string(&mut buf)?;
        let value = read_string(&mut buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn read_string(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(RemotingError::Deserialization("header entry truncated".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(RemotingError::Deserialization("header entry truncated".into()));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| RemotingError::Deserialization(format!("header entry not utf-8: {e}")))
}

/// Variant-specific part of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Request {
        /// `None` when the caller set no deadline (always `None` for oneway).
        timeout_ms: Option<u32>,
        oneway: bool,
    },
    Response {
        status: ResponseStatus,
        /// Local receipt time (ms since unix epoch); never on the wire.
        response_time_millis: Option<u64>,
        /// Remote address the response came from; never on the wire.
        response_host: Option<String>,
        /// Local cause for synthetic responses; never on the wire.
        cause: Option<String>,
    },
    Heartbeat {
        timeout_ms: Option<u32>,
    },
    HeartbeatAck {
        status: ResponseStatus,
    },
}

/// Protocol envelope exchanged over a connection.
#[derive(Debug, Clone)]
pub struct Command {
    pub framing: Framing,
    pub code: CommandCode,
    pub cmd_version: u8,
    pub id: u32,
    pub serializer: SerializerId,
    pub kind: CommandKind,
    pub payload: Payload,
}

pub const DEFAULT_CMD_VERSION: u8 = 1;

impl Command {
    pub fn request(
        code: CommandCode,
        id: u32,
        framing: Framing,
        serializer: SerializerId,
        timeout_ms: Option<u32>,
        payload: Payload,
    ) -> Self {
        Self {
            framing,
            code,
            cmd_version: DEFAULT_CMD_VERSION,
            id,
            serializer,
            kind: CommandKind::Request {
                timeout_ms,
                oneway: false,
            },
            payload,
        }
    }

    pub fn oneway(code: CommandCode, id: u32, framing: Framing, serializer: SerializerId, payload: Payload) -> Self {
        Self {
            kind: CommandKind::Request {
                timeout_ms: None,
                oneway: true,
            },
            ..Self::request(code, id, framing, serializer, None, payload)
        }
    }

    pub fn heartbeat(id: u32, framing: Framing, timeout_ms: Option<u32>) -> Self {
        Self {
            framing,
            code: CommandCode::HEARTBEAT,
            cmd_version: DEFAULT_CMD_VERSION,
            id,
            serializer: SerializerId::default(),
            kind: CommandKind::Heartbeat { timeout_ms },
            payload: Payload::empty(),
        }
    }

    /// Reply to `req`: same id, framing and serializer. Heartbeats get a
    /// heartbeat ack, everything else an rpc response.
    pub fn response_to(req: &Command, status: ResponseStatus, payload: Payload) -> Self {
        let (code, kind) = match req.kind {
            CommandKind::Heartbeat { .. } => (CommandCode::HEARTBEAT, CommandKind::HeartbeatAck { status }),
            _ => (
                CommandCode::RPC_RESPONSE,
                CommandKind::Response {
                    status,
                    response_time_millis: None,
                    response_host: None,
                    cause: None,
                },
            ),
        };
        Self {
            framing: req.framing,
            code,
            cmd_version: req.cmd_version,
            id: req.id,
            serializer: req.serializer,
            kind,
            payload,
        }
    }

    /// Error reply to `req` carrying `msg` as string content.
    pub fn error_response(req: &Command, status: ResponseStatus, msg: impl Into<String>) -> Self {
        let payload = Payload::new(None, None, Some(Value::String(msg.into())));
        Self::response_to(req, status, payload)
    }

    /// Locally produced outcome (timeout, send failure, close) for `id`.
    /// Never written to the wire.
    pub fn synthetic_response(id: u32, status: ResponseStatus, cause: impl Into<String>, host: Option<String>) -> Self {
        Self {
            framing: Framing::default(),
            code: CommandCode::RPC_RESPONSE,
            cmd_version: DEFAULT_CMD_VERSION,
            id,
            serializer: SerializerId::default(),
            kind: CommandKind::Response {
                status,
                response_time_millis: None,
                response_host: host,
                cause: Some(cause.into()),
            },
            payload: Payload::empty(),
        }
    }

    pub fn command_type(&self) -> CommandType {
        match self.kind {
            CommandKind::Request { oneway: true, .. } => CommandType::RequestOneway,
            CommandKind::Request { .. } | CommandKind::Heartbeat { .. } => CommandType::Request,
            CommandKind::Response { .. } | CommandKind::HeartbeatAck { .. } => CommandType::Response,
        }
    }

    pub fn is_response(&self) -> bool {
        self.command_type() == CommandType::Response
    }

    pub fn is_oneway(&self) -> bool {
        self.command_type() == CommandType::RequestOneway
    }

    /// Requests other than oneway expect exactly one reply.
    pub fn expects_response(&self) -> bool {
        self.command_type() == CommandType::Request
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.kind, CommandKind::Heartbeat { .. } | CommandKind::HeartbeatAck { .. })
    }

    pub fn status(&self) -> Option<ResponseStatus> {
        match &self.kind {
            CommandKind::Response { status, .. } | CommandKind::HeartbeatAck { status } => Some(*status),
            _ => None,
        }
    }

    pub fn timeout_ms(&self) -> Option<u32> {
        match self.kind {
            CommandKind::Request { timeout_ms, .. } | CommandKind::Heartbeat { timeout_ms } => timeout_ms,
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Response { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    pub fn response_host(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Response { response_host, .. } => response_host.as_deref(),
            _ => None,
        }
    }

    pub fn response_time_millis(&self) -> Option<u64> {
        match self.kind {
            CommandKind::Response { response_time_millis, .. } => response_time_millis,
            _ => None,
        }
    }

    /// Record where and when a response was received.
    pub fn set_response_meta(&mut self, host: impl Into<String>, millis: u64) {
        if let CommandKind::Response {
            response_time_millis,
            response_host,
            ..
        } = &mut self.kind
        {
            *response_time_millis = Some(millis);
            *response_host = Some(host.into());
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        self.payload.class_name()
    }

    pub fn advance_to(&mut self, level: DecodeLevel, registry: &SerializerRegistry) -> Result<()> {
        self.payload.advance_to(level, self.serializer, registry)
    }

    pub fn serialize(&mut self, registry: &SerializerRegistry) -> Result<()> {
        self.payload.serialize(self.serializer, registry)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn stages_advance_one_segment_at_a_time() {
        let reg = SerializerRegistry::with_defaults();
        let mut header = HeaderMap::new();
        header.insert("tenant".into(), "acme".into());

        let mut out = Payload::new(Some("demo.Echo".into()), Some(header.clone()), Some(json!({"n": 1})));
        out.serialize(SerializerId::JSON, &reg).unwrap();

        let mut inbound = Payload::from_wire(
            Bytes::copy_from_slice(out.class_bytes()),
            Bytes::copy_from_slice(out.header_bytes()),
            Bytes::copy_from_slice(out.content_bytes()),
        );
        assert_eq!(inbound.stage(), DecodeStage::Undecoded);

        inbound.advance_to(DecodeLevel::ClassOnly, SerializerId::JSON, &reg).unwrap();
        assert_eq!(inbound.stage(), DecodeStage::ClassKnown);
        assert_eq!(inbound.class_name(), Some("demo.Echo"));
        assert!(inbound.header().is_none());
        assert!(inbound.content().is_none());

        inbound.advance_to(DecodeLevel::ClassAndHeader, SerializerId::JSON, &reg).unwrap();
        assert_eq!(inbound.header(), Some(&header));
        assert!(inbound.content().is_none());

        inbound.advance_to(DecodeLevel::Full, SerializerId::JSON, &reg).unwrap();
        assert_eq!(inbound.stage(), DecodeStage::FullyDecoded);
        assert_eq!(inbound.content(), Some(&json!({"n": 1})));
    }

    #[test]
    fn bad_content_stops_at_header_stage() {
        let reg = SerializerRegistry::with_defaults();
        let mut p = Payload::from_wire(Bytes::from_static(b"x"), Bytes::new(), Bytes::from_static(b"{not json"));
        let err = p.advance_to(DecodeLevel::Full, SerializerId::JSON, &reg).unwrap_err();
        assert_eq!(err.kind().as_str(), "DESERIALIZATION");
        assert_eq!(p.stage(), DecodeStage::HeaderKnown);
        assert_eq!(p.class_name(), Some("x"));
    }

    #[test]
    fn unknown_serializer_is_a_deserialization_error() {
        let reg = SerializerRegistry::with_defaults();
        let mut p = Payload::from_wire(Bytes::new(), Bytes::new(), Bytes::from_static(b"1"));
        let err = p.advance_to(DecodeLevel::Full, SerializerId(42), &reg).unwrap_err();
        assert_eq!(err.kind().as_str(), "DESERIALIZATION");
    }

    #[test]
    fn truncated_header_map_is_rejected() {
        let err = decode_header_map(Bytes::from_static(&[0, 0, 0, 5, b'a'])).unwrap_err();
        assert_eq!(err.kind().as_str(), "DESERIALIZATION");
    }

    #[test]
    fn heartbeat_reply_is_an_ack() {
        let hb = Command::heartbeat(9, Framing::V1, Some(1000));
        let ack = Command::response_to(&hb, ResponseStatus::Success, Payload::empty());
        assert_eq!(ack.code, CommandCode::HEARTBEAT);
        assert_eq!(ack.id, 9);
        assert_eq!(ack.kind, CommandKind::HeartbeatAck { status: ResponseStatus::Success });
        assert!(ack.is_response());
    }
}
