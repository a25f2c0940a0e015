//! SQL batch request encoding.
//!
//! A batch payload is an ALL_HEADERS block followed by the SQL text in
//! UTF-16LE. The only header sent is the transaction descriptor.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{utf16_byte_len, write_utf16_string};

/// Size of the ALL_HEADERS block written before the SQL text.
pub const ALL_HEADERS_LEN: usize = 22;

const TRANSACTION_DESCRIPTOR_HEADER_LEN: u32 = 18;
const TRANSACTION_DESCRIPTOR_HEADER_TYPE: u16 = 0x0002;

/// Encode a SQL batch outside of any explicit transaction.
///
/// ```
/// use tds_protocol::sql_batch::encode_sql_batch;
///
/// let payload = encode_sql_batch("SELECT 1");
/// assert_eq!(payload.len(), 22 + 16);
/// ```
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    encode_sql_batch_with_transaction(sql, 0)
}

/// Encode a SQL batch with a transaction descriptor.
///
/// `transaction_descriptor` is the value the server returned in a
/// begin-transaction environment change, or 0 for auto-commit.
#[must_use]
pub fn encode_sql_batch_with_transaction(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + utf16_byte_len(sql));

    buf.put_u32_le(ALL_HEADERS_LEN as u32);
    buf.put_u32_le(TRANSACTION_DESCRIPTOR_HEADER_LEN);
    buf.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER_TYPE);
    buf.put_u64_le(transaction_descriptor);
    // outstanding request count, always 1 without MARS
    buf.put_u32_le(1);

    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

/// SQL batch builder.
#[derive(Debug, Clone)]
pub struct SqlBatch {
    sql: String,
    transaction_descriptor: u64,
}

impl SqlBatch {
    /// Create a new SQL batch.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            transaction_descriptor: 0,
        }
    }

    /// Run the batch inside the given transaction.
    #[must_use]
    pub fn with_transaction(mut self, descriptor: u64) -> Self {
        self.transaction_descriptor = descriptor;
        self
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Encode the batch payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        encode_sql_batch_with_transaction(&self.sql, self.transaction_descriptor)
    }
}
