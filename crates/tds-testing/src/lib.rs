//! # tds-testing
//!
//! Test infrastructure for the TDS client crates.
//!
//! - [`ScriptedTransport`]: an in-memory transport that answers each
//!   complete request with the next scripted [`Step`]
//! - [`MockTdsServer`]: a TCP server that completes a handshake and answers
//!   SQL batches from a response table
//! - [`ResponseBuilder`]: assembles server token streams for both
//!
//! ## Scripted transport example
//!
//! ```rust,ignore
//! use tds_testing::{ScriptedTransport, Step, ResponseBuilder, tokens};
//!
//! let transport = ScriptedTransport::new([
//!     Step::tabular(tokens::prelogin_response(EncryptionLevel::NotSupported)?),
//!     Step::tabular(tokens::login_response("master", None)),
//!     Step::Stall,
//! ]);
//! let client = Client::handshake(transport.clone(), config).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;
pub mod scripted;
pub mod tokens;

pub use mock_server::{
    LoginRequest, MockResponse, MockServerBuilder, MockServerConfig, MockServerError,
    MockTdsServer,
};
pub use scripted::{ScriptedTransport, Step};
pub use tokens::{MockColumn, ResponseBuilder, ScalarValue};
