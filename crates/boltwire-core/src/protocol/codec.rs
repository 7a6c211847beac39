//! Incremental frame codec (panic-free).
//!
//! Frame layout (big-endian):
//!
//! ```text
//! protocol 1: proto type code(2) cmd_ver id(4) ser               {timeout(4)|status(2)} cls(2) hdr(2) cnt(4) ...
//! protocol 2: proto ver type code(2) cmd_ver id(4) ser switch    {timeout(4)|status(2)} cls(2) hdr(2) cnt(4) ... [crc32c(4)]
//! ```
//!
//! Parsing rules:
//! - `decode` never consumes a partial frame: `Ok(None)` leaves `src` untouched.
//! - Every error returned by `decode` is a framing error and fatal to the stream.
//! - With integrity required, every inbound frame must be protocol 2, version 2
//!   with the CRC switch on; the bytes that select the trailer cannot switch it off.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RemotingError, Result};
use crate::protocol::command::{Command, CommandKind, Payload};
use crate::protocol::status::ResponseStatus;
use crate::protocol::{CommandCode, CommandType, Framing, Protocol, ProtocolSwitch};
use crate::serializer::SerializerId;

pub const V1_REQUEST_HEADER_LEN: usize = 22;
pub const V1_RESPONSE_HEADER_LEN: usize = 20;
pub const V2_REQUEST_HEADER_LEN: usize = 24;
pub const V2_RESPONSE_HEADER_LEN: usize = 22;
pub const CRC_LEN: usize = 4;

/// Default limit on the sum of the three declared segment lengths.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Fixed header length for a protocol / command type pair.
pub fn header_len(protocol: Protocol, ty: CommandType) -> usize {
    match (protocol, ty) {
        (Protocol::V1, CommandType::Response) => V1_RESPONSE_HEADER_LEN,
        (Protocol::V1, _) => V1_REQUEST_HEADER_LEN,
        (Protocol::V2, CommandType::Response) => V2_RESPONSE_HEADER_LEN,
        (Protocol::V2, _) => V2_REQUEST_HEADER_LEN,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandCodec {
    max_frame_bytes: usize,
    require_crc: bool,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl CommandCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            require_crc: false,
        }
    }

    /// Refuse any inbound frame that does not carry a CRC-32C trailer.
    pub fn require_integrity(mut self, on: bool) -> Self {
        self.require_crc = on;
        self
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn integrity_required(&self) -> bool {
        self.require_crc
    }

    /// Append one frame for `cmd` to `dst`. Payload segments must already be
    /// serialized (`Command::serialize`); absent segments are written as empty.
    pub fn encode(&self, cmd: &Command, dst: &mut BytesMut) -> Result<()> {
        let p = &cmd.payload;
        let class_len = u16::try_from(p.class_bytes().len())
            .map_err(|_| RemotingError::Serialization("class name longer than 65535 bytes".into()))?;
        let header_len_ = u16::try_from(p.header_bytes().len())
            .map_err(|_| RemotingError::Serialization("header longer than 65535 bytes".into()))?;
        let content_len = u32::try_from(p.content_bytes().len())
            .map_err(|_| RemotingError::Serialization("content longer than u32::MAX bytes".into()))?;

        let body = class_len as usize + header_len_ as usize + content_len as usize;
        if body > self.max_frame_bytes {
            return Err(RemotingError::FrameTooLarge {
                size: body,
                max: self.max_frame_bytes,
            });
        }

        let framing = cmd.framing;
        let ty = cmd.command_type();
        let crc = framing.crc_enabled();
        let start = dst.len();
        dst.reserve(header_len(framing.protocol, ty) + body + if crc { CRC_LEN } else { 0 });

        dst.put_u8(framing.protocol.code());
        if framing.protocol == Protocol::V2 {
            dst.put_u8(framing.version);
        }
        dst.put_u8(ty.code());
        dst.put_u16(cmd.code.value());
        dst.put_u8(cmd.cmd_version);
        dst.put_u32(cmd.id);
        dst.put_u8(cmd.serializer.0);
        if framing.protocol == Protocol::V2 {
            dst.put_u8(framing.switch.bits());
        }
        match cmd.status() {
            Some(status) => dst.put_u16(status.code()),
            None => dst.put_i32(encode_timeout(cmd.timeout_ms())),
        }
        dst.put_u16(class_len);
        dst.put_u16(header_len_);
        dst.put_u32(content_len);
        dst.put_slice(p.class_bytes());
        dst.put_slice(p.header_bytes());
        dst.put_slice(p.content_bytes());

        if crc {
            let sum = crc32c::crc32c(dst.get(start..).unwrap_or_default());
            dst.put_u32(sum);
        }
        Ok(())
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `src` is unchanged.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Command>> {
        let mut cur: &[u8] = &src[..];

        if cur.remaining() < 1 {
            return Ok(None);
        }
        let protocol = Protocol::from_code(cur.get_u8())?;
        if self.require_crc && protocol != Protocol::V2 {
            return Err(RemotingError::Codec(format!(
                "protocol {} frame on a connection that requires crc",
                protocol.code()
            )));
        }

        let version = match protocol {
            Protocol::V1 => 1,
            Protocol::V2 => {
                if cur.remaining() < 1 {
                    return Ok(None);
                }
                let v = cur.get_u8();
                if v != 1 && v != 2 {
                    return Err(RemotingError::Codec(format!("unsupported protocol version: {v}")));
                }
                if self.require_crc && v != 2 {
                    return Err(RemotingError::Codec(format!("protocol version {v} cannot carry crc")));
                }
                v
            }
        };

        if cur.remaining() < 1 {
            return Ok(None);
        }
        let ty = CommandType::from_code(cur.get_u8())?;

        let fixed = header_len(protocol, ty);
        if src.len() < fixed {
            return Ok(None);
        }

        let code = CommandCode(cur.get_u16());
        if ty == CommandType::RequestOneway && code == CommandCode::HEARTBEAT {
            return Err(RemotingError::Codec("heartbeat sent as oneway request".into()));
        }
        let cmd_version = cur.get_u8();
        let id = cur.get_u32();
        let serializer = SerializerId(cur.get_u8());
        let switch = match protocol {
            Protocol::V1 => ProtocolSwitch::default(),
            Protocol::V2 => ProtocolSwitch::from_bits(cur.get_u8())?,
        };
        if switch.crc() && version < 2 {
            return Err(RemotingError::Codec(format!("crc switch set on protocol version {version}")));
        }
        if self.require_crc && !switch.crc() {
            return Err(RemotingError::Codec("crc switch off on a connection that requires crc".into()));
        }
        let (timeout, status) = match ty {
            CommandType::Response => (None, Some(ResponseStatus::from_code(cur.get_u16()))),
            _ => (decode_timeout(cur.get_i32()), None),
        };
        let class_len = cur.get_u16() as usize;
        let header_len_ = cur.get_u16() as usize;
        let content_len = cur.get_u32() as usize;

        let body = class_len + header_len_ + content_len;
        if body > self.max_frame_bytes {
            return Err(RemotingError::FrameTooLarge {
                size: body,
                max: self.max_frame_bytes,
            });
        }

        let framing = Framing {
            protocol,
            version,
            switch,
        };
        let crc = framing.crc_enabled();
        let total = fixed + body + if crc { CRC_LEN } else { 0 };
        if src.len() < total {
            return Ok(None);
        }

        if crc {
            let covered = total - CRC_LEN;
            let actual = crc32c::crc32c(src.get(..covered).unwrap_or_default());
            let mut trailer = src.get(covered..total).unwrap_or_default();
            let expected = trailer.get_u32();
            if expected != actual {
                return Err(RemotingError::ChecksumMismatch { expected, actual });
            }
        }

        let frame: Bytes = src.split_to(total).freeze();
        let class_at = fixed;
        let header_at = class_at + class_len;
        let content_at = header_at + header_len_;
        let payload = Payload::from_wire(
            frame.slice(class_at..header_at),
            frame.slice(header_at..content_at),
            frame.slice(content_at..content_at + content_len),
        );

        let kind = match (ty, code == CommandCode::HEARTBEAT) {
            (CommandType::Response, true) => CommandKind::HeartbeatAck {
                status: status.unwrap_or(ResponseStatus::Unknown),
            },
            (CommandType::Response, false) => CommandKind::Response {
                status: status.unwrap_or(ResponseStatus::Unknown),
                response_time_millis: None,
                response_host: None,
                cause: None,
            },
            (_, true) => CommandKind::Heartbeat { timeout_ms: timeout },
            (ty, false) => CommandKind::Request {
                timeout_ms: timeout,
                oneway: ty == CommandType::RequestOneway,
            },
        };

        Ok(Some(Command {
            framing,
            code,
            cmd_version,
            id,
            serializer,
            kind,
            payload,
        }))
    }
}

fn encode_timeout(timeout_ms: Option<u32>) -> i32 {
    match timeout_ms {
        Some(t) => i32::try_from(t).unwrap_or(i32::MAX),
        None => -1,
    }
}

fn decode_timeout(raw: i32) -> Option<u32> {
    u32::try_from(raw).ok()
}
