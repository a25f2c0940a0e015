//! Result decoding.
//!
//! [`ResultDecoder`] walks one reassembled response and sorts its tokens
//! into result sets, server messages and completion records. Server errors
//! are collected rather than returned as `Err`: a server error does not
//! invalidate the connection, so the caller decides what to do with it.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::token::{
    ColMetaData, ColumnMetadata, Done, EnvChange, LoginAck, Row, SqlServerError, Token,
    TokenParser,
};
use crate::version::TdsVersion;

/// One result set: the columns announced by a COLMETADATA token and the
/// rows that followed it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column definitions.
    pub columns: Vec<ColumnMetadata>,
    /// Rows in arrival order.
    pub rows: Vec<Row>,
    /// Column numbers from an ORDER token, if one was sent.
    pub order: Vec<u16>,
}

impl ResultSet {
    fn new(metadata: &ColMetaData) -> Self {
        Self {
            columns: metadata.columns.clone(),
            rows: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Everything one response buffer contained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Result sets in arrival order.
    pub result_sets: Vec<ResultSet>,
    /// ERROR tokens.
    pub errors: Vec<SqlServerError>,
    /// INFO tokens.
    pub infos: Vec<SqlServerError>,
    /// DONE, DONEPROC and DONEINPROC records.
    pub dones: Vec<Done>,
    /// Environment changes.
    pub env_changes: Vec<EnvChange>,
    /// Login acknowledgment, present only in a login response.
    pub login_ack: Option<LoginAck>,
    /// Last RETURNSTATUS value.
    pub return_status: Option<i32>,
}

impl Response {
    /// Check if the server sent any ERROR token.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// First ERROR token, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&SqlServerError> {
        self.errors.first()
    }

    /// Sum of the row counts of completion records that carry one.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.dones
            .iter()
            .filter(|d| d.has_count())
            .map(|d| d.row_count)
            .sum()
    }

    /// The last database named by an ENVCHANGE.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.env_changes.iter().rev().find_map(EnvChange::new_database)
    }

    /// The last packet size named by an ENVCHANGE.
    #[must_use]
    pub fn packet_size(&self) -> Option<u32> {
        self.env_changes
            .iter()
            .rev()
            .find_map(EnvChange::new_packet_size)
    }
}

/// Decodes response buffers for one protocol version.
#[derive(Debug, Clone, Copy)]
pub struct ResultDecoder {
    version: TdsVersion,
}

impl ResultDecoder {
    /// Create a decoder for the given protocol version.
    #[must_use]
    pub fn new(version: TdsVersion) -> Self {
        Self { version }
    }

    /// Protocol version this decoder expects.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }

    /// Decode a complete response buffer.
    ///
    /// Each COLMETADATA starts a new result set; its metadata is used for
    /// the ROW tokens that follow until the next COLMETADATA replaces it.
    pub fn decode(&self, data: Bytes) -> Result<Response, ProtocolError> {
        let mut parser = TokenParser::new(data, self.version);
        let mut response = Response::default();
        let mut metadata: Option<ColMetaData> = None;

        while let Some(token) = parser.next_token_with_metadata(metadata.as_ref())? {
            match token {
                Token::ColMetaData(meta) => {
                    if meta.is_empty() {
                        metadata = None;
                    } else {
                        response.result_sets.push(ResultSet::new(&meta));
                        metadata = Some(meta);
                    }
                }
                Token::Row(row) => {
                    if let Some(set) = response.result_sets.last_mut() {
                        set.rows.push(row);
                    }
                }
                Token::Order(order) => {
                    if let Some(set) = response.result_sets.last_mut() {
                        set.order = order.columns;
                    }
                }
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    response.dones.push(done);
                }
                Token::ReturnStatus(status) => response.return_status = Some(status),
                Token::Error(err) => response.errors.push(err),
                Token::Info(info) => response.infos.push(info),
                Token::LoginAck(ack) => response.login_ack = Some(ack),
                Token::EnvChange(change) => response.env_changes.push(change),
                Token::Other(_) => {}
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::{EnvChangeType, TokenType};
    use crate::value::Value;
    use bytes::{BufMut, BytesMut};

    fn int_and_name_metadata(buf: &mut BytesMut) {
        buf.put_u8(0x81);
        buf.put_u16_le(2);
        // id INT
        buf.put_u32_le(0);
        buf.put_u16_le(0);
        buf.put_u8(0x38);
        buf.put_slice(&[2, b'i', 0, b'd', 0]);
        // name NVARCHAR(20)
        buf.put_u32_le(0);
        buf.put_u16_le(1);
        buf.put_u8(0xE7);
        buf.put_u16_le(40);
        buf.put_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]);
        buf.put_slice(&[4, b'n', 0, b'a', 0, b'm', 0, b'e', 0]);
    }

    fn row(buf: &mut BytesMut, id: i32, name: Option<&str>) {
        buf.put_u8(0xD1);
        buf.put_i32_le(id);
        match name {
            Some(name) => {
                let encoded = crate::codec::encode_utf16le(name);
                buf.put_u16_le(encoded.len() as u16);
                buf.put_slice(&encoded);
            }
            None => buf.put_u16_le(0xFFFF),
        }
    }

    #[test]
    fn test_decode_result_set() {
        let mut buf = BytesMut::new();
        int_and_name_metadata(&mut buf);
        row(&mut buf, 1, Some("alice"));
        row(&mut buf, 2, None);
        Done::with_count(193, 2).encode(&mut buf, TdsVersion::V7_4);

        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(buf.freeze())
            .unwrap();

        assert_eq!(response.result_sets.len(), 1);
        let set = &response.result_sets[0];
        assert_eq!(set.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0].values, vec![Value::Int(1), Value::String("alice".into())]);
        assert_eq!(set.rows[1].values, vec![Value::Int(2), Value::Null]);
        assert_eq!(response.rows_affected(), 2);
        assert!(!response.has_errors());
    }

    #[test]
    fn test_metadata_replaced_per_result() {
        let mut buf = BytesMut::new();
        int_and_name_metadata(&mut buf);
        row(&mut buf, 7, Some("x"));
        // second result: a single BIGINT column
        buf.put_slice(&[0x81, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0x7F, 0x01, b'n', 0]);
        buf.put_u8(0xD1);
        buf.put_i64_le(-9);

        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(buf.freeze())
            .unwrap();
        assert_eq!(response.result_sets.len(), 2);
        assert_eq!(response.result_sets[1].rows[0].values, vec![Value::BigInt(-9)]);
    }

    #[test]
    fn test_server_error_is_collected() {
        let err = SqlServerError {
            number: 208,
            state: 1,
            class: 16,
            message: "Invalid object name 'nope'.".to_string(),
            server: "srv".to_string(),
            procedure: String::new(),
            line: 1,
        };
        let mut buf = BytesMut::new();
        err.encode(TokenType::Error, &mut buf, TdsVersion::V7_4);
        Done {
            status: crate::token::DoneStatus {
                error: true,
                ..Default::default()
            },
            cur_cmd: 0,
            row_count: 0,
        }
        .encode(&mut buf, TdsVersion::V7_4);

        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(buf.freeze())
            .unwrap();
        assert_eq!(response.first_error(), Some(&err));
        assert!(response.dones[0].has_error());
    }

    #[test]
    fn test_error_from_literal_bytes() {
        let data: &[u8] = &[
            0xAA, 0x1A, 0x00, // ERROR, 26 bytes
            0xD0, 0x00, 0x00, 0x00, // number 208
            0x01, // state
            0x10, // class 16
            0x04, 0x00, b'n', 0x00, b'o', 0x00, b'p', 0x00, b'e', 0x00, // message
            0x02, b'd', 0x00, b'b', 0x00, // server
            0x00, // no procedure
            0x01, 0x00, 0x00, 0x00, // line
            0xFD, 0x02, 0x00, 0xC1, 0x00, // DONE, error status, SELECT
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(Bytes::copy_from_slice(data))
            .unwrap();
        let err = response.first_error().unwrap();
        assert_eq!(err.number, 208);
        assert_eq!(err.class, 16);
        assert_eq!(err.message, "nope");
        assert_eq!(err.server, "db");
        assert!(err.procedure.is_empty());
        assert_eq!(err.line, 1);
        assert_eq!(response.dones.len(), 1);
        assert!(response.dones[0].has_error());
        assert_eq!(response.dones[0].cur_cmd, 0xC1);
        assert!(response.result_sets.is_empty());
    }

    #[test]
    fn test_login_response() {
        let mut buf = BytesMut::new();
        EnvChange::encode_string(EnvChangeType::Database, "master", "", &mut buf);
        SqlServerError {
            number: 5701,
            state: 2,
            class: 0,
            message: "Changed database context to 'master'.".to_string(),
            server: "srv".to_string(),
            procedure: String::new(),
            line: 1,
        }
        .encode(TokenType::Info, &mut buf, TdsVersion::V7_4);
        EnvChange::encode_string(EnvChangeType::PacketSize, "4096", "4096", &mut buf);
        LoginAck {
            interface: 1,
            tds_version: TdsVersion::V7_4.raw(),
            prog_name: "srv".to_string(),
            prog_version: 0x0F00_0000,
        }
        .encode(&mut buf);
        Done::with_count(0, 0).encode(&mut buf, TdsVersion::V7_4);

        let response = ResultDecoder::new(TdsVersion::V7_4)
            .decode(buf.freeze())
            .unwrap();
        assert_eq!(response.database(), Some("master"));
        assert_eq!(response.packet_size(), Some(4096));
        assert_eq!(response.infos.len(), 1);
        assert_eq!(
            response.login_ack.unwrap().tds_version(),
            TdsVersion::V7_4
        );
    }

    #[test]
    fn test_legacy_version_done_width() {
        let mut buf = BytesMut::new();
        Done::with_count(0, 3).encode(&mut buf, TdsVersion::V7_1);
        buf.put_u8(0x79);
        buf.put_i32_le(0);

        let response = ResultDecoder::new(TdsVersion::V7_1)
            .decode(buf.freeze())
            .unwrap();
        assert_eq!(response.rows_affected(), 3);
        assert_eq!(response.return_status, Some(0));
    }

    #[test]
    fn test_truncated_row_fails() {
        let mut buf = BytesMut::new();
        int_and_name_metadata(&mut buf);
        buf.put_slice(&[0xD1, 0x01, 0x00]);

        assert!(
            ResultDecoder::new(TdsVersion::V7_4)
                .decode(buf.freeze())
                .is_err()
        );
    }
}
