//! Response status table (wire-visible, 2 bytes).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Success,
    Error,
    ServerException,
    Unknown,
    ServerThreadpoolBusy,
    ErrorComm,
    NoProcessor,
    Timeout,
    ClientSendError,
    CodecException,
    ConnectionClosed,
    ServerSerializeException,
    ServerDeserializeException,
}

impl ResponseStatus {
    pub fn code(self) -> u16 {
        match self {
            ResponseStatus::Success => 0x0000,
            ResponseStatus::Error => 0x0001,
            ResponseStatus::ServerException => 0x0002,
            ResponseStatus::Unknown => 0x0003,
            ResponseStatus::ServerThreadpoolBusy => 0x0004,
            ResponseStatus::ErrorComm => 0x0005,
            ResponseStatus::NoProcessor => 0x0006,
            ResponseStatus::Timeout => 0x0007,
            ResponseStatus::ClientSendError => 0x0008,
            ResponseStatus::CodecException => 0x0009,
            ResponseStatus::ConnectionClosed => 0x0010,
            ResponseStatus::ServerSerializeException => 0x0011,
            ResponseStatus::ServerDeserializeException => 0x0012,
        }
    }

    /// Unrecognized codes decode as `Unknown` rather than failing the frame.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => ResponseStatus::Success,
            0x0001 => ResponseStatus::Error,
            0x0002 => ResponseStatus::ServerException,
            0x0004 => ResponseStatus::ServerThreadpoolBusy,
            0x0005 => ResponseStatus::ErrorComm,
            0x0006 => ResponseStatus::NoProcessor,
            0x0007 => ResponseStatus::Timeout,
            0x0008 => ResponseStatus::ClientSendError,
            0x0009 => ResponseStatus::CodecException,
            0x0010 => ResponseStatus::ConnectionClosed,
            0x0011 => ResponseStatus::ServerSerializeException,
            0x0012 => ResponseStatus::ServerDeserializeException,
            _ => ResponseStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Success => "SUCCESS",
            ResponseStatus::Error => "ERROR",
            ResponseStatus::ServerException => "SERVER_EXCEPTION",
            ResponseStatus::Unknown => "UNKNOWN",
            ResponseStatus::ServerThreadpoolBusy => "SERVER_THREADPOOL_BUSY",
            ResponseStatus::ErrorComm => "ERROR_COMM",
            ResponseStatus::NoProcessor => "NO_PROCESSOR",
            ResponseStatus::Timeout => "TIMEOUT",
            ResponseStatus::ClientSendError => "CLIENT_SEND_ERROR",
            ResponseStatus::CodecException => "CODEC_EXCEPTION",
            ResponseStatus::ConnectionClosed => "CONNECTION_CLOSED",
            ResponseStatus::ServerSerializeException => "SERVER_SERIALIZE_EXCEPTION",
            ResponseStatus::ServerDeserializeException => "SERVER_DESERIALIZE_EXCEPTION",
        }
    }

    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
