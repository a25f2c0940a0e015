//! Client error types.

use std::sync::Arc;

use tds_codec::CodecError;
use tds_protocol::{ProtocolError, SqlServerError};
use thiserror::Error;

use crate::state::StateSnapshot;

/// Errors that can occur during client operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Socket read or write failed.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// Malformed or out-of-sequence data from the server.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Packet framing failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Server returned an error token.
    #[error("server error: {0}")]
    Server(SqlServerError),

    /// The server asked for something this client does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A caller-supplied value is not acceptable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// An earlier failure left the connection unusable.
    #[error("connection is unusable after an earlier failure")]
    Unusable,

    /// A transport deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// The operation is not permitted in the current connection state.
    #[error("{operation} not permitted in state {state}")]
    InvalidState {
        /// State at the time of the call.
        state: StateSnapshot,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error leaves the connection unusable.
    ///
    /// Server errors, bad arguments and calls made in the wrong state do
    /// not touch the connection; everything else does.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Server(_) | Self::InvalidArgument(_) | Self::InvalidState { .. }
        )
    }

    /// Whether the error came from the socket.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server(err) if err.number == number)
    }

    /// Get the error class/severity if this is a server error.
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server(err) => Some(err.class),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedFeature(what) => Self::UnsupportedFeature(what),
            ProtocolError::InvalidArgument(what) => Self::InvalidArgument(what),
            other => Self::Protocol(other),
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) => Self::Transport(Arc::new(io)),
            CodecError::Protocol(protocol) => protocol.into(),
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            other => Self::Codec(other.to_string()),
        }
    }
}

impl From<SqlServerError> for Error {
    fn from(err: SqlServerError) -> Self {
        Self::Server(err)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
