//! # tds-codec
//!
//! Async framing layer for TDS packet handling.
//!
//! This crate turns a raw byte stream into TDS packets and packets into
//! complete messages, on top of tokio-util's codec framework.
//!
//! ## Features
//!
//! - Packet reassembly across TCP segments
//! - Message reassembly with inbound type checking
//! - A short final packet at end of stream is accepted with a warning
//! - A single outbound sequence counter per connection
//!
//! ## Architecture
//!
//! ```text
//! Transport → TdsCodec (packet framing) → MessageAssembler → Client
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::Connection;
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{MessageAssembler, ReceivedMessage};
pub use packet_codec::TdsCodec;
