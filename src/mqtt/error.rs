//! Error definitions for the broker link and wire codec

use std::io;
use thiserror::Error;

/// Failures while encoding or decoding a single packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The bytes on the wire do not form a valid packet
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Remaining length exceeds what four continuation bytes can carry
    #[error("remaining length {0} exceeds protocol maximum")]
    LengthOverflow(usize),

    /// Strings are prefixed with a 16-bit length
    #[error("string field of {0} bytes exceeds 65535")]
    TopicTooLong(usize),

    #[error("transport error while decoding: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the CONNECT/CONNACK handshake.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// CONNACK carried a non-zero return code
    #[error("broker rejected connection with return code {0}")]
    Rejected(u8),

    #[error("malformed CONNACK: {0:02x?}")]
    Malformed(Vec<u8>),

    #[error("transport error during handshake: {0}")]
    Io(#[from] io::Error),

    #[error("could not encode CONNECT: {0}")]
    Encode(#[from] ProtocolError),
}

/// Failures of a SUBSCRIBE/SUBACK exchange. Never fatal.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("cannot subscribe while link is {0:?}")]
    NotConnected(super::link::ConnectionState),

    /// First byte of the reply was not a SUBACK fixed header
    #[error("unexpected reply to SUBSCRIBE: header 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("transport error during subscribe: {0}")]
    Io(#[from] io::Error),

    #[error("could not encode SUBSCRIBE: {0}")]
    Encode(#[from] ProtocolError),
}

/// Failures of an outbound PUBLISH.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The write failed, the single reconnect-and-retry failed too
    #[error("link down, message dropped: {0}")]
    LinkDown(String),

    #[error("could not encode PUBLISH: {0}")]
    Encode(#[from] ProtocolError),
}
