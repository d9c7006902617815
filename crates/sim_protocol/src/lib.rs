//! Wire protocol spoken between the Kernel, CPU, Memoria and I/O services.
//!
//! Every message is `[op: u32][payload_size: u32][payload]` and the payload is
//! a sequence of `[field_size: u32][field_bytes]` fields, all little endian.

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod opcode;

use std::fmt;
use std::io;

pub use connection::Connection;
pub use frame::{FieldReader, Packet};
pub use handshake::Handshake;
pub use message::Message;
pub use opcode::OpCode;

/// Errors returned by protocol encoders/decoders and connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Underlying field framing error.
    Frame(frame::FrameError),
    /// Field length does not match expected size.
    InvalidLength(&'static str),
    /// Required field is missing.
    MissingField(&'static str),
    /// UTF-8 validation failed.
    InvalidUtf8,
    /// Operation code is not part of the protocol.
    UnknownOpCode(u32),
    /// Operation code is valid but not expected here.
    UnexpectedMessage(OpCode),
    /// The peer closed the connection.
    Closed,
    /// Socket level failure.
    Io(io::ErrorKind),
}

impl ProtocolError {
    /// Returns a stable, human-readable error label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolError::Frame(_) => "invalid frame",
            ProtocolError::InvalidLength(_) => "invalid length",
            ProtocolError::MissingField(_) => "missing field",
            ProtocolError::InvalidUtf8 => "invalid utf8",
            ProtocolError::UnknownOpCode(_) => "unknown op code",
            ProtocolError::UnexpectedMessage(_) => "unexpected message",
            ProtocolError::Closed => "connection closed",
            ProtocolError::Io(_) => "io error",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidLength(field) | ProtocolError::MissingField(field) => {
                write!(f, "{} ({})", self.as_str(), field)
            }
            ProtocolError::UnknownOpCode(op) => write!(f, "{} ({})", self.as_str(), op),
            ProtocolError::UnexpectedMessage(op) => write!(f, "{} ({:?})", self.as_str(), op),
            ProtocolError::Io(kind) => write!(f, "{} ({:?})", self.as_str(), kind),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<frame::FrameError> for ProtocolError {
    fn from(err: frame::FrameError) -> Self {
        ProtocolError::Frame(err)
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io(err.kind())
    }
}
