//! boltwire core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire-level contracts shared by the remoting runtime:
//! the `Command` envelope with its staged payload, the framing codec, response
//! status codes, and the serializer registry. It intentionally carries no
//! runtime dependencies so it can be reused by tooling and tests.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed input surfaces as `RemotingError`, never as a crash.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod serializer;

pub use error::{ErrorKind, RemotingError, Result};
pub use protocol::codec;
pub use protocol::command::{Command, CommandKind, DecodeLevel, DecodeStage, HeaderMap, Payload};
pub use protocol::status::ResponseStatus;
pub use protocol::{CommandCode, CommandType, Framing, Protocol, ProtocolSwitch};
pub use serializer::{JsonSerializer, Serializer, SerializerId, SerializerRegistry};
