//! # tds-protocol
//!
//! Wire formats of the Tabular Data Stream protocol, with no IO.
//!
//! - [`packet`]: the 8-byte packet header, message framing and reassembly.
//! - [`token_stream`]: self-describing token records keyed by length class.
//! - [`prelogin`] and [`login7`]: handshake request payloads.
//! - [`token`], [`value`] and [`result`]: response parsing.
//! - [`sql_batch`]: SQL batch request payloads.
//!
//! Async transport handling lives in `tds-codec`; connection management in
//! `tds-client`.
//!
//! ## Example
//!
//! ```
//! use tds_protocol::{frame, defragment, Message, PacketType};
//!
//! let message = Message::new(PacketType::SqlBatch, vec![0u8; 10_000]);
//! let packets = frame(&message, 4096, 1).unwrap();
//! assert_eq!(packets.len(), 3);
//! assert_eq!(packets[0].header.packet_id, 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod result;
pub mod sql_batch;
pub mod token;
pub mod token_stream;
pub mod types;
pub mod value;
pub mod version;

pub use error::ProtocolError;
pub use login7::{
    Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags, VariableField,
    deobfuscate_password, encode_variable_data, ensure_brackets, obfuscate_password,
};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, Message, PACKET_HEADER_SIZE, Packet, PacketHeader,
    PacketStatus, PacketType, check_inbound, defragment, frame, packet_count,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use result::{Response, ResultDecoder, ResultSet};
pub use sql_batch::{SqlBatch, encode_sql_batch, encode_sql_batch_with_transaction};
pub use token::{
    ColMetaData, Collation, ColumnMetadata, Done, DoneStatus, EnvChange, EnvChangeType,
    EnvChangeValue, LoginAck, Order, Row, SqlServerError, Token, TokenParser, TokenType, TypeInfo,
};
pub use token_stream::{FixedSize, LengthClass, StreamToken, decode_tokens, encode_tokens};
pub use types::{ColumnFlags, TypeId, Updateable, ValueLength};
pub use value::Value;
pub use version::{ProductVersion, TdsVersion};
