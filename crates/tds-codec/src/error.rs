//! Codec error type.

use std::io;

use tds_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while reading or writing packets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Packet or message contents violate the wire format.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Header length field is smaller than the header itself.
    #[error("invalid packet header")]
    InvalidHeader,

    /// Packet exceeds the configured ceiling.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Declared packet size.
        size: usize,
        /// Largest accepted size.
        max: usize,
    },

    /// Transport closed before a complete message was read.
    #[error("connection closed")]
    ConnectionClosed,
}

impl CodecError {
    /// Whether the failure came from the transport rather than the data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }
}
