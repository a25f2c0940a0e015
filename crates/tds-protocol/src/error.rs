//! Protocol-level error type.

use thiserror::Error;

/// Errors raised while encoding or decoding wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Packet type byte is not a known message type.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet status byte is neither 0 nor 1.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// A packet of the wrong type arrived inside an exchange.
    #[error("unexpected packet type: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedPacketType {
        /// Type the exchange expects.
        expected: u8,
        /// Type that was received.
        actual: u8,
    },

    /// Fewer bytes were available than a length field announced.
    #[error("incomplete data: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Bytes announced.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Buffer ended in the middle of a field.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Token definition byte is not recognised.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// A length prefix is not legal for the value it describes.
    #[error("invalid length {length} for {context}")]
    InvalidLength {
        /// What was being decoded.
        context: &'static str,
        /// Length that was found.
        length: usize,
    },

    /// A packet arrived after the end-of-message packet of the same message.
    #[error("packets follow the end-of-message packet")]
    TrailingPackets,

    /// A response that must fit one packet arrived in several.
    #[error("{context} response spans {packets} packets, expected 1")]
    FragmentedResponse {
        /// Exchange the response belongs to.
        context: &'static str,
        /// Packets that were received.
        packets: usize,
    },

    /// Pre-login option table is malformed.
    #[error("invalid pre-login option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Text could not be decoded.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// Structurally valid input that this implementation does not handle.
    #[error("not implemented: {0}")]
    UnsupportedFeature(String),

    /// Caller-supplied value violates a format rule.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// Whether this error means "not implemented" rather than a protocol violation.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedFeature(_))
    }

    /// Whether this error was caused by a bad caller-supplied value.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedFeature(what.into())
    }

    pub(crate) fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }
}
