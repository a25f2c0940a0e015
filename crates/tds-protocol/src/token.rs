//! Response token definitions and parsing.
//!
//! Tokens are the units of a server response. Several of them change shape
//! with the negotiated protocol version, so the parser is created with the
//! version in effect for the connection.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tds_protocol::token::{Token, TokenParser};
//! use tds_protocol::TdsVersion;
//!
//! let mut parser = TokenParser::new(data, TdsVersion::V7_4);
//! let mut metadata = None;
//!
//! while let Some(token) = parser.next_token_with_metadata(metadata.as_ref())? {
//!     match token {
//!         Token::ColMetaData(meta) => metadata = Some(meta),
//!         Token::Error(err) => eprintln!("{err}"),
//!         _ => {}
//!     }
//! }
//! ```

use core::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::codec::{read_b_varchar, read_us_varchar, write_b_varchar, write_us_varchar};
use crate::error::ProtocolError;
use crate::token_stream::StreamToken;
use crate::types::{ColumnFlags, TypeId, ValueLength};
use crate::value::Value;
use crate::version::TdsVersion;

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Column metadata (COLMETADATA).
    ColMetaData = 0x81,
    /// Error message (ERROR).
    Error = 0xAA,
    /// Informational message (INFO).
    Info = 0xAB,
    /// Login acknowledgment (LOGINACK).
    LoginAck = 0xAD,
    /// Row data (ROW).
    Row = 0xD1,
    /// Null bitmap compressed row (NBCROW).
    NbcRow = 0xD2,
    /// Environment change (ENVCHANGE).
    EnvChange = 0xE3,
    /// Done (DONE).
    Done = 0xFD,
    /// Done procedure (DONEPROC).
    DoneProc = 0xFE,
    /// Done in procedure (DONEINPROC).
    DoneInProc = 0xFF,
    /// Return status (RETURNSTATUS).
    ReturnStatus = 0x79,
    /// Order (ORDER).
    Order = 0xA9,
}

impl TokenType {
    /// Create a token type from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x81 => Some(Self::ColMetaData),
            0xAA => Some(Self::Error),
            0xAB => Some(Self::Info),
            0xAD => Some(Self::LoginAck),
            0xD1 => Some(Self::Row),
            0xD2 => Some(Self::NbcRow),
            0xE3 => Some(Self::EnvChange),
            0xFD => Some(Self::Done),
            0xFE => Some(Self::DoneProc),
            0xFF => Some(Self::DoneInProc),
            0x79 => Some(Self::ReturnStatus),
            0xA9 => Some(Self::Order),
            _ => None,
        }
    }
}

/// Parsed response token.
#[derive(Debug, Clone)]
pub enum Token {
    /// Column metadata describing the result set that follows.
    ColMetaData(ColMetaData),
    /// Row data.
    Row(Row),
    /// Completion of a SQL statement.
    Done(Done),
    /// Completion of a stored procedure.
    DoneProc(Done),
    /// Completion of a statement within a stored procedure.
    DoneInProc(Done),
    /// Return status from a stored procedure.
    ReturnStatus(i32),
    /// Error message from the server.
    Error(SqlServerError),
    /// Informational message from the server.
    Info(SqlServerError),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Environment change notification.
    EnvChange(EnvChange),
    /// Column ordering information.
    Order(Order),
    /// A token with no dedicated decoder, read by its length class.
    Other(StreamToken),
}

/// Column metadata token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColMetaData {
    /// Column definitions.
    pub columns: Vec<ColumnMetadata>,
}

/// Column definition within metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub type_id: TypeId,
    /// Column flags.
    pub flags: ColumnFlags,
    /// User type ID.
    pub user_type: u32,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
}

/// Type-specific metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Maximum length for variable-length types.
    pub max_length: Option<u32>,
    /// Collation for character types.
    pub collation: Option<Collation>,
    /// Table name for legacy large-object types.
    pub table_name: Option<String>,
}

/// Five-byte collation descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collation {
    /// Locale ID and comparison flags.
    pub lcid: u32,
    /// Sort ID.
    pub sort_id: u8,
}

/// Row token, one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Values in column order.
    pub values: Vec<Value>,
}

/// DONE, DONEPROC or DONEINPROC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Status flags.
    pub status: DoneStatus,
    /// Current command.
    pub cur_cmd: u16,
    /// Row count, meaningful when `status.count` is set.
    pub row_count: u64,
}

/// Done status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneStatus {
    /// More results follow.
    pub more: bool,
    /// Error occurred.
    pub error: bool,
    /// Transaction in progress.
    pub in_xact: bool,
    /// Row count is valid.
    pub count: bool,
    /// Attention acknowledgment.
    pub attn: bool,
    /// Server error caused statement termination.
    pub srverror: bool,
}

/// Error or informational message sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlServerError {
    /// Message number.
    pub number: i32,
    /// State, a modifier to the number.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number, 1-based; 0 when not applicable.
    pub line: i32,
}

/// Login acknowledgment token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type.
    pub interface: u8,
    /// Protocol version the server accepted.
    pub tds_version: u32,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: u32,
}

/// Environment change token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// Type of environment change.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvChangeValue,
    /// Old value.
    pub old_value: EnvChangeValue,
}

/// Environment change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvChangeType {
    /// Database changed.
    Database,
    /// Language changed.
    Language,
    /// Character set changed.
    CharacterSet,
    /// Packet size changed.
    PacketSize,
    /// SQL collation.
    SqlCollation,
    /// Begin transaction.
    BeginTransaction,
    /// Commit transaction.
    CommitTransaction,
    /// Rollback transaction.
    RollbackTransaction,
    /// Any other change; its body is kept raw.
    Other(u8),
}

/// Environment change value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChangeValue {
    /// String value.
    String(String),
    /// Binary value.
    Binary(Bytes),
}

/// Column ordering information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Ordered column numbers.
    pub columns: Vec<u16>,
}

// =============================================================================
// Metadata and rows
// =============================================================================

impl ColMetaData {
    /// Column count announcing that no metadata follows.
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Decode a COLMETADATA token body.
    pub fn decode(src: &mut impl Buf, version: TdsVersion) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }

        let column_count = src.get_u16_le();
        if column_count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            columns.push(Self::decode_column(src, version)?);
        }

        Ok(Self { columns })
    }

    fn decode_column(
        src: &mut impl Buf,
        version: TdsVersion,
    ) -> Result<ColumnMetadata, ProtocolError> {
        let user_type_size = if version.has_wide_fields() { 4 } else { 2 };
        if src.remaining() < user_type_size + 3 {
            return Err(ProtocolError::UnexpectedEof);
        }

        let user_type = if version.has_wide_fields() {
            src.get_u32_le()
        } else {
            u32::from(src.get_u16_le())
        };
        let flags = ColumnFlags::from_bits(src.get_u16_le());
        let type_id = TypeId::try_from_u8(src.get_u8())?;
        let type_info = Self::decode_type_info(src, type_id, version)?;
        let name = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;

        Ok(ColumnMetadata {
            name,
            type_id,
            flags,
            user_type,
            type_info,
        })
    }

    fn decode_type_info(
        src: &mut impl Buf,
        type_id: TypeId,
        version: TdsVersion,
    ) -> Result<TypeInfo, ProtocolError> {
        let mut info = TypeInfo::default();

        match type_id.value_length() {
            ValueLength::Fixed(_) => return Ok(info),
            ValueLength::ByteLen => {
                if src.remaining() < 1 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.max_length = Some(u32::from(src.get_u8()));
            }
            ValueLength::UShortLen => {
                if src.remaining() < 2 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let max_length = src.get_u16_le();
                if max_length == 0xFFFF {
                    return Err(ProtocolError::unsupported(
                        "partially length-prefixed (max) columns",
                    ));
                }
                info.max_length = Some(u32::from(max_length));
            }
            ValueLength::TextPtr => {
                if src.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                info.max_length = Some(src.get_u32_le());
            }
        }

        if type_id.has_collation() && version >= TdsVersion::V7_1 {
            info.collation = Some(decode_collation(src)?);
        }

        if type_id.value_length() == ValueLength::TextPtr {
            info.table_name = Some(decode_table_name(src, version)?);
        }

        Ok(info)
    }

    /// Get the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check if this represents no metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn decode_collation(src: &mut impl Buf) -> Result<Collation, ProtocolError> {
    if src.remaining() < 5 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let lcid = src.get_u32_le();
    let sort_id = src.get_u8();
    Ok(Collation { lcid, sort_id })
}

/// Table name of a legacy large-object column: one name before 7.2, a
/// count of dotted parts from 7.2 on.
fn decode_table_name(src: &mut impl Buf, version: TdsVersion) -> Result<String, ProtocolError> {
    if !version.has_wide_fields() {
        return read_us_varchar(src).ok_or(ProtocolError::UnexpectedEof);
    }

    if src.remaining() < 1 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let parts = src.get_u8();
    let mut names = Vec::with_capacity(parts as usize);
    for _ in 0..parts {
        names.push(read_us_varchar(src).ok_or(ProtocolError::UnexpectedEof)?);
    }
    Ok(names.join("."))
}

impl ColumnMetadata {
    /// Check if this column is nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.nullable
    }

    /// How the column's values are length-prefixed in a ROW token.
    #[must_use]
    pub fn value_length(&self) -> ValueLength {
        self.type_id.value_length()
    }
}

impl Row {
    /// Decode a ROW token body using the preceding metadata.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|column| Value::decode(src, column))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { values })
    }

    /// Get a value by column index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// Completion tokens
// =============================================================================

mod done_status_bits {
    pub const DONE_MORE: u16 = 0x0001;
    pub const DONE_ERROR: u16 = 0x0002;
    pub const DONE_INXACT: u16 = 0x0004;
    pub const DONE_COUNT: u16 = 0x0010;
    pub const DONE_ATTN: u16 = 0x0020;
    pub const DONE_SRVERROR: u16 = 0x0100;
}

impl DoneStatus {
    /// Parse done status from raw bits.
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        use done_status_bits::*;
        Self {
            more: (bits & DONE_MORE) != 0,
            error: (bits & DONE_ERROR) != 0,
            in_xact: (bits & DONE_INXACT) != 0,
            count: (bits & DONE_COUNT) != 0,
            attn: (bits & DONE_ATTN) != 0,
            srverror: (bits & DONE_SRVERROR) != 0,
        }
    }

    /// Convert to raw bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        use done_status_bits::*;
        let mut bits = 0u16;
        if self.more {
            bits |= DONE_MORE;
        }
        if self.error {
            bits |= DONE_ERROR;
        }
        if self.in_xact {
            bits |= DONE_INXACT;
        }
        if self.count {
            bits |= DONE_COUNT;
        }
        if self.attn {
            bits |= DONE_ATTN;
        }
        if self.srverror {
            bits |= DONE_SRVERROR;
        }
        bits
    }
}

impl Done {
    /// Body size: 8 bytes of row count from 7.2 on, 4 before.
    #[must_use]
    pub const fn size(version: TdsVersion) -> usize {
        if version.has_wide_fields() { 12 } else { 8 }
    }

    /// Create a DONE with a valid row count.
    #[must_use]
    pub fn with_count(cur_cmd: u16, row_count: u64) -> Self {
        Self {
            status: DoneStatus {
                count: true,
                ..Default::default()
            },
            cur_cmd,
            row_count,
        }
    }

    /// Decode a DONE, DONEPROC or DONEINPROC body.
    pub fn decode(src: &mut impl Buf, version: TdsVersion) -> Result<Self, ProtocolError> {
        let size = Self::size(version);
        if src.remaining() < size {
            return Err(ProtocolError::IncompletePacket {
                expected: size,
                actual: src.remaining(),
            });
        }

        let status = DoneStatus::from_bits(src.get_u16_le());
        let cur_cmd = src.get_u16_le();
        let row_count = if version.has_wide_fields() {
            src.get_u64_le()
        } else {
            u64::from(src.get_u32_le())
        };

        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode as a DONE token, including the token byte.
    pub fn encode(&self, dst: &mut impl BufMut, version: TdsVersion) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.to_bits());
        dst.put_u16_le(self.cur_cmd);
        if version.has_wide_fields() {
            dst.put_u64_le(self.row_count);
        } else {
            dst.put_u32_le(self.row_count as u32);
        }
    }

    /// Check if more results follow this token.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.more
    }

    /// Check if an error occurred.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.error
    }

    /// Check if the row count is valid.
    #[must_use]
    pub const fn has_count(&self) -> bool {
        self.status.count
    }
}

// =============================================================================
// Messages
// =============================================================================

impl SqlServerError {
    /// Decode an ERROR or INFO token body.
    ///
    /// The line number is 4 bytes from 7.2 on and 2 bytes before.
    pub fn decode(src: &mut impl Buf, version: TdsVersion) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        // the record length is informational
        let _length = src.get_u16_le();

        if src.remaining() < 6 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();

        let message = read_us_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;
        let server = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;
        let procedure = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;

        let line = if version.has_wide_fields() {
            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }
            src.get_i32_le()
        } else {
            if src.remaining() < 2 {
                return Err(ProtocolError::UnexpectedEof);
            }
            i32::from(src.get_u16_le())
        };

        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode as a token with the given definition byte (ERROR or INFO).
    pub fn encode(&self, token: TokenType, dst: &mut impl BufMut, version: TdsVersion) {
        let mut body = Vec::new();
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        write_us_varchar(&mut body, &self.message);
        write_b_varchar(&mut body, &self.server);
        write_b_varchar(&mut body, &self.procedure);
        if version.has_wide_fields() {
            body.put_i32_le(self.line);
        } else {
            body.put_u16_le(self.line as u16);
        }

        dst.put_u8(token as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }

    /// Check if this is a fatal error (severity >= 20).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }

    /// Check if this error aborted the batch (severity >= 16).
    #[must_use]
    pub const fn is_batch_abort(&self) -> bool {
        self.class >= 16
    }
}

impl fmt::Display for SqlServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Msg {}, Level {}, State {}, Line {}\n{}",
            self.number, self.class, self.state, self.line, self.message
        )
    }
}

impl std::error::Error for SqlServerError {}

impl LoginAck {
    /// Decode a LOGINACK token body.
    ///
    /// The protocol and program versions are big-endian here, unlike the
    /// little-endian version field of the login request.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let _length = src.get_u16_le();

        if src.remaining() < 5 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let interface = src.get_u8();
        let tds_version = src.get_u32();
        let prog_name = read_b_varchar(src).ok_or(ProtocolError::UnexpectedEof)?;

        if src.remaining() < 4 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let prog_version = src.get_u32();

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Encode as a LOGINACK token, including the token byte.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = Vec::new();
        body.put_u8(self.interface);
        body.put_u32(self.tds_version);
        write_b_varchar(&mut body, &self.prog_name);
        body.put_u32(self.prog_version);

        dst.put_u8(TokenType::LoginAck as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }

    /// Get the accepted protocol version.
    #[must_use]
    pub fn tds_version(&self) -> TdsVersion {
        TdsVersion::new(self.tds_version)
    }
}

impl EnvChangeType {
    /// Create from raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            7 => Self::SqlCollation,
            8 => Self::BeginTransaction,
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            other => Self::Other(other),
        }
    }

    /// Raw byte value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::CharacterSet => 3,
            Self::PacketSize => 4,
            Self::SqlCollation => 7,
            Self::BeginTransaction => 8,
            Self::CommitTransaction => 9,
            Self::RollbackTransaction => 10,
            Self::Other(other) => other,
        }
    }
}

impl EnvChange {
    /// Decode an ENVCHANGE token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let length = src.get_u16_le() as usize;
        if length == 0 {
            return Err(ProtocolError::InvalidLength {
                context: "ENVCHANGE",
                length,
            });
        }
        if src.remaining() < length {
            return Err(ProtocolError::IncompletePacket {
                expected: length,
                actual: src.remaining(),
            });
        }

        let mut body = src.copy_to_bytes(length);
        let env_type = EnvChangeType::from_u8(body.get_u8());

        let (new_value, old_value) = match env_type {
            EnvChangeType::Database
            | EnvChangeType::Language
            | EnvChangeType::CharacterSet
            | EnvChangeType::PacketSize => {
                let new_value = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
                let old_value = read_b_varchar(&mut body).ok_or(ProtocolError::UnexpectedEof)?;
                (
                    EnvChangeValue::String(new_value),
                    EnvChangeValue::String(old_value),
                )
            }
            EnvChangeType::SqlCollation
            | EnvChangeType::BeginTransaction
            | EnvChangeType::CommitTransaction
            | EnvChangeType::RollbackTransaction => {
                let new_value = read_b_varbyte(&mut body)?;
                let old_value = read_b_varbyte(&mut body)?;
                (
                    EnvChangeValue::Binary(new_value),
                    EnvChangeValue::Binary(old_value),
                )
            }
            EnvChangeType::Other(_) => (
                EnvChangeValue::Binary(body),
                EnvChangeValue::Binary(Bytes::new()),
            ),
        };

        Ok(Self {
            env_type,
            new_value,
            old_value,
        })
    }

    /// Encode a string-valued change, including the token byte.
    pub fn encode_string(
        env_type: EnvChangeType,
        new_value: &str,
        old_value: &str,
        dst: &mut impl BufMut,
    ) {
        let mut body = vec![env_type.to_u8()];
        write_b_varchar(&mut body, new_value);
        write_b_varchar(&mut body, old_value);

        dst.put_u8(TokenType::EnvChange as u8);
        dst.put_u16_le(body.len() as u16);
        dst.put_slice(&body);
    }

    /// Get the new database name if this is a database change.
    #[must_use]
    pub fn new_database(&self) -> Option<&str> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::Database, EnvChangeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Get the new packet size if this is a packet size change.
    #[must_use]
    pub fn new_packet_size(&self) -> Option<u32> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::PacketSize, EnvChangeValue::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

fn read_b_varbyte(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    if src.remaining() < 1 {
        return Err(ProtocolError::UnexpectedEof);
    }
    let len = src.get_u8() as usize;
    if src.remaining() < len {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(src.copy_to_bytes(len))
}

impl Order {
    /// Decode an ORDER token body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }

        let length = src.get_u16_le() as usize;
        if length % 2 != 0 {
            return Err(ProtocolError::InvalidLength {
                context: "ORDER",
                length,
            });
        }
        if src.remaining() < length {
            return Err(ProtocolError::IncompletePacket {
                expected: length,
                actual: src.remaining(),
            });
        }

        let columns = (0..length / 2).map(|_| src.get_u16_le()).collect();
        Ok(Self { columns })
    }
}

// =============================================================================
// Parser
// =============================================================================

/// Token stream parser over one response buffer.
///
/// ROW tokens can only be decoded against the most recent COLMETADATA, which
/// the caller passes to [`TokenParser::next_token_with_metadata`].
pub struct TokenParser {
    data: Bytes,
    position: usize,
    version: TdsVersion,
}

impl TokenParser {
    /// Create a new token parser from bytes.
    #[must_use]
    pub fn new(data: Bytes, version: TdsVersion) -> Self {
        Self {
            data,
            position: 0,
            version,
        }
    }

    /// Get remaining bytes in the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to parse.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Peek at the next token type without consuming it.
    #[must_use]
    pub fn peek_token_type(&self) -> Option<TokenType> {
        self.data
            .get(self.position)
            .and_then(|&byte| TokenType::from_u8(byte))
    }

    /// Parse the next token that does not need column metadata.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        self.next_token_with_metadata(None)
    }

    /// Parse the next token with optional column metadata context.
    ///
    /// Returns `None` at the end of the buffer. A ROW without metadata is
    /// an error; NBCROW is reported as unsupported.
    pub fn next_token_with_metadata(
        &mut self,
        metadata: Option<&ColMetaData>,
    ) -> Result<Option<Token>, ProtocolError> {
        if !self.has_remaining() {
            return Ok(None);
        }

        let mut buf = &self.data[self.position..];
        let start_len = buf.len();
        let definition = buf[0];

        let token = match TokenType::from_u8(definition) {
            Some(token_type) => {
                buf.advance(1);
                self.decode_known(token_type, &mut buf, metadata)?
            }
            None => Token::Other(StreamToken::decode(&mut buf)?),
        };

        let consumed = start_len - buf.len();
        self.position += consumed;
        Ok(Some(token))
    }

    fn decode_known(
        &self,
        token_type: TokenType,
        buf: &mut &[u8],
        metadata: Option<&ColMetaData>,
    ) -> Result<Token, ProtocolError> {
        let version = self.version;
        let token = match token_type {
            TokenType::ColMetaData => Token::ColMetaData(ColMetaData::decode(buf, version)?),
            TokenType::Row => {
                let metadata =
                    metadata.ok_or(ProtocolError::InvalidTokenType(TokenType::Row as u8))?;
                Token::Row(Row::decode(buf, metadata)?)
            }
            TokenType::NbcRow => {
                return Err(ProtocolError::unsupported("null bitmap compressed rows"));
            }
            TokenType::Done => Token::Done(Done::decode(buf, version)?),
            TokenType::DoneProc => Token::DoneProc(Done::decode(buf, version)?),
            TokenType::DoneInProc => Token::DoneInProc(Done::decode(buf, version)?),
            TokenType::ReturnStatus => {
                if buf.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                Token::ReturnStatus(buf.get_i32_le())
            }
            TokenType::Error => Token::Error(SqlServerError::decode(buf, version)?),
            TokenType::Info => Token::Info(SqlServerError::decode(buf, version)?),
            TokenType::LoginAck => Token::LoginAck(LoginAck::decode(buf)?),
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(buf)?),
            TokenType::Order => Token::Order(Order::decode(buf)?),
        };
        Ok(token)
    }

    /// Get the current position in the buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Protocol version the parser decodes for.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn sample_error() -> SqlServerError {
        SqlServerError {
            number: 5701,
            state: 1,
            class: 10,
            message: "Changed database context to 'master'.".to_string(),
            server: "SQLSRV".to_string(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_done_roundtrip_per_version() {
        let done = Done::with_count(193, 42);

        for version in [TdsVersion::V7_1, TdsVersion::V7_4] {
            let mut buf = BytesMut::new();
            done.encode(&mut buf, version);
            assert_eq!(buf.len(), 1 + Done::size(version));

            let mut cursor = &buf[1..];
            assert_eq!(Done::decode(&mut cursor, version).unwrap(), done);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_done_status_bits() {
        let status = DoneStatus {
            more: true,
            error: true,
            count: true,
            ..Default::default()
        };
        assert_eq!(status.to_bits(), 0x0013);
        assert_eq!(DoneStatus::from_bits(status.to_bits()), status);
    }

    #[test]
    fn test_token_parser_done() {
        let data = Bytes::from_static(&[
            0xFD, // DONE
            0x10, 0x00, // status: DONE_COUNT
            0xC1, 0x00, // cur_cmd: 193 (SELECT)
            0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // row_count: 5
        ]);

        let mut parser = TokenParser::new(data, TdsVersion::V7_4);
        match parser.next_token().unwrap().unwrap() {
            Token::Done(done) => {
                assert!(done.has_count());
                assert!(!done.has_more());
                assert_eq!(done.cur_cmd, 193);
                assert_eq!(done.row_count, 5);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(parser.next_token().unwrap().is_none());
    }

    #[test]
    fn test_error_token_literal_bytes() {
        const ERROR_5701: [u8; 29] = [
            0xAA, 0x1A, 0x00, // ERROR, 26 bytes
            0x45, 0x16, 0x00, 0x00, // number 5701
            0x01, // state
            0x0A, // class
            0x03, 0x00, b'C', 0x00, b't', 0x00, b'x', 0x00, // message
            0x02, b'S', 0x00, b'1', 0x00, // server
            0x01, b'p', 0x00, // procedure
            0x07, 0x00, 0x00, 0x00, // line
        ];

        let mut parser = TokenParser::new(Bytes::from_static(&ERROR_5701), TdsVersion::V7_4);
        let err = match parser.next_token().unwrap().unwrap() {
            Token::Error(err) => err,
            other => panic!("expected Error, got {other:?}"),
        };
        assert_eq!(err.number, 5701);
        assert_eq!(err.state, 1);
        assert_eq!(err.class, 10);
        assert_eq!(err.message, "Ctx");
        assert_eq!(err.server, "S1");
        assert_eq!(err.procedure, "p");
        assert_eq!(err.line, 7);
        assert!(parser.next_token().unwrap().is_none());

        let mut encoded = BytesMut::new();
        err.encode(TokenType::Error, &mut encoded, TdsVersion::V7_4);
        assert_eq!(&encoded[..], &ERROR_5701[..]);
    }

    #[test]
    fn test_error_token_known_values() {
        let mut buf = BytesMut::new();
        sample_error().encode(TokenType::Error, &mut buf, TdsVersion::V7_4);

        let mut parser = TokenParser::new(buf.freeze(), TdsVersion::V7_4);
        match parser.next_token().unwrap().unwrap() {
            Token::Error(err) => {
                assert_eq!(err.number, 5701);
                assert_eq!(err.state, 1);
                assert_eq!(err.class, 10);
                assert_eq!(err.message, "Changed database context to 'master'.");
                assert_eq!(err.server, "SQLSRV");
                assert_eq!(err.procedure, "");
                assert_eq!(err.line, 1);
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_line_width_follows_version() {
        let mut wide = BytesMut::new();
        sample_error().encode(TokenType::Info, &mut wide, TdsVersion::V7_2);
        let mut narrow = BytesMut::new();
        sample_error().encode(TokenType::Info, &mut narrow, TdsVersion::V7_1);
        assert_eq!(wide.len(), narrow.len() + 2);

        let mut cursor = &narrow[1..];
        let decoded = SqlServerError::decode(&mut cursor, TdsVersion::V7_1).unwrap();
        assert_eq!(decoded, sample_error());
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_server_error_display() {
        assert_eq!(
            sample_error().to_string(),
            "Msg 5701, Level 10, State 1, Line 1\nChanged database context to 'master'."
        );
    }

    #[test]
    fn test_colmetadata_user_type_width() {
        // one INT column named "a"
        let wide = [0x01, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0x38, 0x01, b'a', 0x00];
        let narrow = [0x01, 0x00, 0, 0, 0x00, 0x00, 0x38, 0x01, b'a', 0x00];

        let meta = ColMetaData::decode(&mut &wide[..], TdsVersion::V7_4).unwrap();
        assert_eq!(meta.columns[0].type_id, TypeId::Int4);
        assert_eq!(meta.columns[0].name, "a");

        let meta = ColMetaData::decode(&mut &narrow[..], TdsVersion::V7_1).unwrap();
        assert_eq!(meta.columns[0].type_id, TypeId::Int4);
        assert_eq!(meta.columns[0].name, "a");
    }

    #[test]
    fn test_colmetadata_nvarchar_collation() {
        let data = [
            0x01, 0x00, // one column
            0x00, 0x00, 0x00, 0x00, // user type
            0x01, 0x00, // nullable
            0xE7, 0x64, 0x00, // NVARCHAR(50)
            0x09, 0x04, 0xD0, 0x00, 0x34, // collation
            0x04, b'n', 0, b'a', 0, b'm', 0, b'e', 0,
        ];
        let meta = ColMetaData::decode(&mut &data[..], TdsVersion::V7_4).unwrap();
        let column = &meta.columns[0];
        assert!(column.is_nullable());
        assert_eq!(column.type_info.max_length, Some(100));
        assert_eq!(column.type_info.collation.unwrap().sort_id, 0x34);
        assert_eq!(column.name, "name");
    }

    #[test]
    fn test_colmetadata_text_table_name() {
        let mut data = vec![0x01, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0x23];
        data.extend_from_slice(&0x7FFF_FFFFu32.to_le_bytes());
        data.extend_from_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        data.push(2); // two name parts
        data.extend_from_slice(&[3, 0, b'd', 0, b'b', 0, b'o', 0]);
        data.extend_from_slice(&[1, 0, b't', 0]);
        data.extend_from_slice(&[1, b'x', 0]);

        let meta = ColMetaData::decode(&mut &data[..], TdsVersion::V7_4).unwrap();
        assert_eq!(meta.columns[0].type_info.table_name.as_deref(), Some("dbo.t"));
        assert_eq!(meta.columns[0].name, "x");
    }

    #[test]
    fn test_unknown_column_type_is_unsupported() {
        let data = [0x01, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0x28, 0x01, b'd', 0x00];
        let err = ColMetaData::decode(&mut &data[..], TdsVersion::V7_4).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_max_column_is_unsupported() {
        let data = [0x01, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0xA5, 0xFF, 0xFF];
        let err = ColMetaData::decode(&mut &data[..], TdsVersion::V7_4).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_no_metadata_marker() {
        let meta = ColMetaData::decode(&mut &[0xFF, 0xFF][..], TdsVersion::V7_4).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_row_requires_metadata() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0xD1, 1, 0, 0, 0]), TdsVersion::V7_4);
        assert!(matches!(
            parser.next_token(),
            Err(ProtocolError::InvalidTokenType(0xD1))
        ));
    }

    #[test]
    fn test_nbcrow_is_unsupported() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0xD2, 0x00]), TdsVersion::V7_4);
        assert!(parser.next_token().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_env_change_database() {
        let mut buf = BytesMut::new();
        EnvChange::encode_string(EnvChangeType::Database, "master", "tempdb", &mut buf);
        EnvChange::encode_string(EnvChangeType::PacketSize, "8192", "4096", &mut buf);

        let mut parser = TokenParser::new(buf.freeze(), TdsVersion::V7_4);
        let Token::EnvChange(db) = parser.next_token().unwrap().unwrap() else {
            panic!("expected EnvChange");
        };
        assert_eq!(db.new_database(), Some("master"));
        assert_eq!(db.old_value, EnvChangeValue::String("tempdb".to_string()));

        let Token::EnvChange(size) = parser.next_token().unwrap().unwrap() else {
            panic!("expected EnvChange");
        };
        assert_eq!(size.new_packet_size(), Some(8192));
    }

    #[test]
    fn test_env_change_unknown_type_skipped() {
        let data = Bytes::from_static(&[0xE3, 0x03, 0x00, 0x14, 0xAA, 0xBB, 0x79, 0, 0, 0, 0]);
        let mut parser = TokenParser::new(data, TdsVersion::V7_4);

        let Token::EnvChange(change) = parser.next_token().unwrap().unwrap() else {
            panic!("expected EnvChange");
        };
        assert_eq!(change.env_type, EnvChangeType::Other(0x14));
        assert!(matches!(
            parser.next_token().unwrap(),
            Some(Token::ReturnStatus(0))
        ));
    }

    #[test]
    fn test_login_ack_version_is_big_endian() {
        let ack = LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4.raw(),
            prog_name: "Microsoft SQL Server".to_string(),
            prog_version: 0x1000_0FA0,
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf);
        assert_eq!(&buf[4..8], &[0x74, 0x00, 0x00, 0x04]);

        let mut cursor = &buf[1..];
        let decoded = LoginAck::decode(&mut cursor).unwrap();
        assert_eq!(decoded, ack);
        assert_eq!(decoded.tds_version(), TdsVersion::V7_4);
    }

    #[test]
    fn test_order_token() {
        let data = Bytes::from_static(&[0xA9, 0x04, 0x00, 0x01, 0x00, 0x03, 0x00]);
        let mut parser = TokenParser::new(data, TdsVersion::V7_4);
        let Token::Order(order) = parser.next_token().unwrap().unwrap() else {
            panic!("expected Order");
        };
        assert_eq!(order.columns, vec![1, 3]);
    }

    #[test]
    fn test_unknown_token_read_by_length_class() {
        // 0xA4 is variable-length: u16 prefix then data
        let data = Bytes::from_static(&[0xA4, 0x02, 0x00, 0xAB, 0xCD, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut parser = TokenParser::new(data, TdsVersion::V7_4);

        let Token::Other(token) = parser.next_token().unwrap().unwrap() else {
            panic!("expected Other");
        };
        assert_eq!(token.definition, 0xA4);
        assert_eq!(&token.data[..], &[0xAB, 0xCD]);
        assert!(matches!(parser.next_token().unwrap(), Some(Token::Done(_))));
    }

    #[test]
    fn test_unknown_variable_count_token_is_unsupported() {
        // bits 4-5 clear on an unknown definition
        let mut parser = TokenParser::new(Bytes::from_static(&[0x82, 0x00]), TdsVersion::V7_4);
        assert!(parser.next_token().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_truncated_token_is_error() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0xFD, 0x10, 0x00]), TdsVersion::V7_4);
        assert!(parser.next_token().is_err());
    }
}
