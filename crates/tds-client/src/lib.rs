//! # tds-client
//!
//! Async TDS client engine: handshake, connection state machine and a
//! serialized request pipeline.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Initial -> PreLogin -> Login -> PostLogin -> Disconnected
//!               \          \          \
//!                +----------+----------+--> Error
//! ```
//!
//! Within each usable state an exchange moves `Ready -> RequestSent ->
//! ParsingResponse -> Ready`. Transport, framing and deadline failures
//! move the connection to `Error`; server error tokens after login do not.
//!
//! ## Request pipeline
//!
//! A single worker task owns the socket. Every request, including the
//! handshake, is queued to it and answered through a oneshot reply, so
//! requests from concurrent [`Client`] clones are written whole and
//! answered in submission order.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_client::{Client, Config, SqlConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tds_client::Error> {
//!     let config = Config::new()
//!         .host("localhost")
//!         .credentials("sa", "Password123")
//!         .database("master");
//!
//!     let client = Client::connect(config).await?;
//!     let rows = client.query("SELECT name FROM sys.databases").await?;
//!     for row in &rows {
//!         println!("{}", row.get(0).map(ToString::to_string).unwrap_or_default());
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod row;
pub mod serializer;
pub mod state;
pub mod statement;

pub use client::Client;
pub use config::{Config, TimeoutConfig};
pub use diagnostics::{DiagnosticsSink, Direction, NoopDiagnostics, TracingDiagnostics};
pub use error::{Error, Result};
pub use handshake::Session;
pub use row::{Column, ExecResult, Row, Rows};
pub use serializer::{RequestSerializer, ResponseBuffers};
pub use state::{ConnectionState, ExchangeState, SharedState, StateMachine, StateSnapshot};
pub use statement::{SqlConnection, Statement};

pub use tds_protocol::{EncryptionLevel, PacketType, Response, SqlServerError, TdsVersion, Value};
