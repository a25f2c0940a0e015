//! Builders for server-side token streams.
//!
//! These produce the bytes a server would send so tests can script
//! responses without hand-assembling tokens.

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::codec::{utf16_byte_len, write_b_varchar, write_utf16_string};
use tds_protocol::{
    ColumnFlags, Done, DoneStatus, EncryptionLevel, EnvChange, EnvChangeType, LoginAck, Message,
    PacketType, PreLogin, ProductVersion, ProtocolError, SqlServerError, TdsVersion, TokenType,
    TypeId, frame,
};

/// Column definition for a scripted result set.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Wire type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes.
    pub max_length: u16,
    /// Nullable flag.
    pub nullable: bool,
}

impl MockColumn {
    /// Create a column definition.
    pub fn new(name: impl Into<String>, type_id: TypeId, max_length: u16) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_length,
            nullable: true,
        }
    }

    /// Nullable 4-byte integer (INTN).
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 4)
    }

    /// Nullable 8-byte integer (INTN).
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN, 8)
    }

    /// Nullable bit (BITN).
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BitN, 1)
    }

    /// Nullable 8-byte float (FLTN).
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::FloatN, 8)
    }

    /// Unicode string of at most `max_chars` characters.
    pub fn nvarchar(name: impl Into<String>, max_chars: u16) -> Self {
        Self::new(name, TypeId::NVarChar, max_chars.saturating_mul(2))
    }

    /// Single-byte string with a 1-byte length prefix.
    pub fn varchar(name: impl Into<String>, max_len: u8) -> Self {
        Self::new(name, TypeId::VarChar, u16::from(max_len))
    }

    /// Binary value with a 2-byte length prefix.
    pub fn varbinary(name: impl Into<String>, max_len: u16) -> Self {
        Self::new(name, TypeId::BigVarBinary, max_len)
    }

    /// Set the nullable flag.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn encode(&self, dst: &mut BytesMut, version: TdsVersion) {
        if version.has_wide_fields() {
            dst.put_u32_le(0);
        } else {
            dst.put_u16_le(0);
        }
        let flags = ColumnFlags {
            nullable: self.nullable,
            ..Default::default()
        };
        dst.put_u16_le(flags.to_bits());
        dst.put_u8(self.type_id as u8);

        match self.type_id {
            TypeId::IntN | TypeId::BitN | TypeId::FloatN | TypeId::VarChar | TypeId::VarBinary => {
                dst.put_u8(self.max_length as u8);
            }
            TypeId::NVarChar | TypeId::BigVarChar | TypeId::BigVarBinary => {
                dst.put_u16_le(self.max_length);
            }
            _ => {}
        }
        if self.type_id.has_collation() && version >= TdsVersion::V7_1 {
            // Latin1_General_CI_AS
            dst.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        }

        write_b_varchar(dst, &self.name);
    }
}

/// A value in a scripted row. Encoded according to its column's type.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 64-bit float.
    Float(f64),
    /// String.
    String(String),
    /// Binary data.
    Binary(Vec<u8>),
}

impl ScalarValue {
    fn encode(&self, column: &MockColumn, dst: &mut BytesMut) {
        let wide_length = matches!(
            column.type_id,
            TypeId::NVarChar | TypeId::BigVarChar | TypeId::BigVarBinary
        );

        match self {
            Self::Null if wide_length => dst.put_u16_le(0xFFFF),
            Self::Null => dst.put_u8(0),
            Self::Bool(v) => {
                dst.put_u8(1);
                dst.put_u8(u8::from(*v));
            }
            Self::Int(v) => {
                dst.put_u8(4);
                dst.put_i32_le(*v);
            }
            Self::BigInt(v) => {
                dst.put_u8(8);
                dst.put_i64_le(*v);
            }
            Self::Float(v) => {
                dst.put_u8(8);
                dst.put_f64_le(*v);
            }
            Self::String(s) if column.type_id == TypeId::NVarChar => {
                dst.put_u16_le(utf16_byte_len(s) as u16);
                write_utf16_string(dst, s);
            }
            Self::String(s) if wide_length => {
                dst.put_u16_le(s.len() as u16);
                dst.put_slice(s.as_bytes());
            }
            Self::String(s) => {
                dst.put_u8(s.len() as u8);
                dst.put_slice(s.as_bytes());
            }
            Self::Binary(b) if wide_length => {
                dst.put_u16_le(b.len() as u16);
                dst.put_slice(b);
            }
            Self::Binary(b) => {
                dst.put_u8(b.len() as u8);
                dst.put_slice(b);
            }
        }
    }
}

/// Assembles a server response token by token.
///
/// ```rust,ignore
/// let payload = ResponseBuilder::new()
///     .columns(&[MockColumn::int("n")])
///     .row(&[ScalarValue::Int(1)])
///     .done(Some(1))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    version: TdsVersion,
    buf: BytesMut,
    columns: Vec<MockColumn>,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuilder {
    /// Start an empty response for protocol 7.4.
    pub fn new() -> Self {
        Self::with_version(TdsVersion::V7_4)
    }

    /// Start an empty response for `version`.
    pub fn with_version(version: TdsVersion) -> Self {
        Self {
            version,
            buf: BytesMut::new(),
            columns: Vec::new(),
        }
    }

    /// Append a LOGINACK.
    #[must_use]
    pub fn login_ack(mut self, prog_name: &str, tds_version: TdsVersion) -> Self {
        LoginAck {
            interface: 1,
            tds_version: tds_version.raw(),
            prog_name: prog_name.to_string(),
            prog_version: 0x1000_0000,
        }
        .encode(&mut self.buf);
        self
    }

    /// Append a string-valued ENVCHANGE.
    #[must_use]
    pub fn env_change(mut self, env_type: EnvChangeType, new_value: &str, old_value: &str) -> Self {
        EnvChange::encode_string(env_type, new_value, old_value, &mut self.buf);
        self
    }

    /// Append a COLMETADATA announcing `columns`.
    #[must_use]
    pub fn columns(mut self, columns: &[MockColumn]) -> Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        self.buf.put_u16_le(columns.len() as u16);
        for column in columns {
            column.encode(&mut self.buf, self.version);
        }
        self.columns = columns.to_vec();
        self
    }

    /// Append a ROW for the most recent COLMETADATA.
    #[must_use]
    pub fn row(mut self, values: &[ScalarValue]) -> Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (value, column) in values.iter().zip(&self.columns) {
            value.encode(column, &mut self.buf);
        }
        self
    }

    /// Append a final DONE, with a row count when `count` is set.
    #[must_use]
    pub fn done(self, count: Option<u64>) -> Self {
        self.done_with(count, false, false)
    }

    /// Append a DONE that announces more results.
    #[must_use]
    pub fn done_more(self, count: Option<u64>) -> Self {
        self.done_with(count, true, false)
    }

    /// Append a DONE with the error bit set.
    #[must_use]
    pub fn done_error(self) -> Self {
        self.done_with(None, false, true)
    }

    fn done_with(mut self, count: Option<u64>, more: bool, error: bool) -> Self {
        let done = Done {
            status: DoneStatus {
                more,
                error,
                count: count.is_some(),
                ..Default::default()
            },
            cur_cmd: 0xC1,
            row_count: count.unwrap_or(0),
        };
        done.encode(&mut self.buf, self.version);
        self
    }

    /// Append an ERROR token.
    #[must_use]
    pub fn error(mut self, number: i32, class: u8, message: &str) -> Self {
        server_message(number, class, message).encode(TokenType::Error, &mut self.buf, self.version);
        self
    }

    /// Append an INFO token.
    #[must_use]
    pub fn info(mut self, number: i32, message: &str) -> Self {
        server_message(number, 0, message).encode(TokenType::Info, &mut self.buf, self.version);
        self
    }

    /// Append raw bytes.
    #[must_use]
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Finish the token stream.
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

fn server_message(number: i32, class: u8, message: &str) -> SqlServerError {
    SqlServerError {
        number,
        state: 1,
        class,
        message: message.to_string(),
        server: "mock".to_string(),
        procedure: String::new(),
        line: 1,
    }
}

/// Pre-login response payload announcing `encryption`.
pub fn prelogin_response(encryption: EncryptionLevel) -> Result<Bytes, ProtocolError> {
    PreLogin::new()
        .with_version(ProductVersion::new(16, 0, 1000, 0))
        .with_encryption(encryption)
        .encode()
}

/// Standard successful login response.
pub fn login_response(database: &str, packet_size: Option<u16>) -> Bytes {
    let mut builder = ResponseBuilder::new().env_change(EnvChangeType::Database, database, "master");
    if let Some(size) = packet_size {
        builder = builder.env_change(EnvChangeType::PacketSize, &size.to_string(), "4096");
    }
    builder
        .info(5701, &format!("Changed database context to '{database}'."))
        .login_ack("Mock TDS Server", TdsVersion::V7_4)
        .done(None)
        .build()
}

/// Frame `payload` as a tabular result of packets no larger than
/// `packet_size`, in wire form.
pub fn frame_response(payload: Bytes, packet_size: usize) -> Bytes {
    let message = Message::new(PacketType::TabularResult, payload);
    let mut out = BytesMut::new();
    // Framing only fails for packet sizes no larger than a header.
    if let Ok(packets) = frame(&message, packet_size, 1) {
        for packet in packets {
            packet.encode(&mut out);
        }
    }
    out.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{ResultDecoder, Value};

    #[test]
    fn test_rows_decode_with_result_decoder() {
        let payload = ResponseBuilder::new()
            .columns(&[
                MockColumn::int("id"),
                MockColumn::nvarchar("name", 20),
                MockColumn::varchar("code", 10),
            ])
            .row(&[
                ScalarValue::Int(1),
                ScalarValue::String("Alice".into()),
                ScalarValue::String("A1".into()),
            ])
            .row(&[ScalarValue::Int(2), ScalarValue::Null, ScalarValue::Null])
            .done(Some(2))
            .build();

        let response = ResultDecoder::new(TdsVersion::V7_4).decode(payload).unwrap();
        assert_eq!(response.result_sets.len(), 1);
        let set = &response.result_sets[0];
        assert_eq!(set.column_names().collect::<Vec<_>>(), vec!["id", "name", "code"]);
        assert_eq!(set.rows[0].values[1], Value::String("Alice".into()));
        assert_eq!(set.rows[0].values[2], Value::String("A1".into()));
        assert_eq!(set.rows[1].values[1], Value::Null);
        assert_eq!(response.rows_affected(), 2);
    }

    #[test]
    fn test_login_response_decodes() {
        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(login_response("app", Some(8192)))
            .unwrap();
        assert_eq!(response.database(), Some("app"));
        assert_eq!(response.packet_size(), Some(8192));
        assert_eq!(response.login_ack.unwrap().tds_version(), TdsVersion::V7_4);
        assert_eq!(response.infos.len(), 1);
    }

    #[test]
    fn test_frame_response_splits_packets() {
        let framed = frame_response(Bytes::from(vec![7u8; 20]), 16);
        // 20 bytes at 8 per packet: 3 packets, 3 headers
        assert_eq!(framed.len(), 20 + 3 * 8);
        assert_eq!(framed[0], 0x04);
        assert_eq!(framed[1], 0x00);
        assert_eq!(framed[6], 1);
    }
}
