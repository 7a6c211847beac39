//! Protocol modules (framing + command model + status table).
//!
//! Two framings share one decoder, selected by the first byte of every frame:
//! - Protocol 1: fixed header, no version byte, no integrity check.
//! - Protocol 2: adds a version byte and a protocol-switch bitset; with
//!   version 2 and the CRC switch on, a CRC-32C trailer covers the frame.
//!
//! All parsers are panic-free: malformed input is reported as
//! `RemotingError` instead of panicking or indexing raw buffers.

pub mod codec;
pub mod command;
pub mod status;

use crate::error::{RemotingError, Result};

/// Protocol code carried in the first byte of each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    V1,
    V2,
}

impl Protocol {
    pub fn code(self) -> u8 {
        match self {
            Protocol::V1 => 1,
            Protocol::V2 => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Protocol::V1),
            2 => Ok(Protocol::V2),
            other => Err(RemotingError::UnsupportedProtocol(other)),
        }
    }
}

/// Per-command option bits, independent of the protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProtocolSwitch(u8);

impl ProtocolSwitch {
    /// Bit 0: append and verify a CRC-32C trailer.
    pub const CRC: u8 = 0x01;
    const KNOWN: u8 = Self::CRC;

    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits & !Self::KNOWN != 0 {
            return Err(RemotingError::Codec(format!(
                "unknown protocol switch bits: {bits:#04x}"
            )));
        }
        Ok(Self(bits))
    }

    pub fn with_crc(crc: bool) -> Self {
        if crc {
            Self(Self::CRC)
        } else {
            Self(0)
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn crc(self) -> bool {
        self.0 & Self::CRC != 0
    }
}

/// Framing selection for one command: protocol code, version and switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framing {
    pub protocol: Protocol,
    /// Only carried on the wire by protocol 2 (1 or 2).
    pub version: u8,
    pub switch: ProtocolSwitch,
}

impl Framing {
    /// Protocol 1: no version byte, no switch, no crc.
    pub const V1: Framing = Framing {
        protocol: Protocol::V1,
        version: 1,
        switch: ProtocolSwitch(0),
    };

    /// Protocol 2, version 2, crc on or off.
    pub fn v2(crc: bool) -> Self {
        Framing {
            protocol: Protocol::V2,
            version: 2,
            switch: ProtocolSwitch::with_crc(crc),
        }
    }

    /// Integrity trailer present for this framing.
    pub fn crc_enabled(&self) -> bool {
        self.protocol == Protocol::V2 && self.version >= 2 && self.switch.crc()
    }
}

impl Default for Framing {
    fn default() -> Self {
        Framing::v2(false)
    }
}

/// Business meaning of a command; selects a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandCode(pub u16);

impl CommandCode {
    pub const HEARTBEAT: CommandCode = CommandCode(0);
    pub const RPC_REQUEST: CommandCode = CommandCode(1);
    pub const RPC_RESPONSE: CommandCode = CommandCode(2);

    pub fn value(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a reply is expected or carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Response,
    Request,
    RequestOneway,
}

impl CommandType {
    pub fn code(self) -> u8 {
        match self {
            CommandType::Response => 0,
            CommandType::Request => 1,
            CommandType::RequestOneway => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CommandType::Response),
            1 => Ok(CommandType::Request),
            2 => Ok(CommandType::RequestOneway),
            other => Err(RemotingError::Codec(format!("unknown command type: {other}"))),
        }
    }
}
