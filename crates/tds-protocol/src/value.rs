//! Column values decoded from ROW tokens.

use core::fmt;

use bytes::{Buf, Bytes};

use crate::codec::{decode_single_byte, decode_utf16le};
use crate::error::ProtocolError;
use crate::token::ColumnMetadata;
use crate::types::{TypeId, ValueLength};

/// Size of the timestamp that follows a text pointer.
const TEXT_TIMESTAMP_SIZE: usize = 8;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// BIT.
    Bool(bool),
    /// TINYINT (unsigned).
    TinyInt(u8),
    /// SMALLINT.
    SmallInt(i16),
    /// INT.
    Int(i32),
    /// BIGINT.
    BigInt(i64),
    /// REAL.
    Real(f32),
    /// FLOAT.
    Float(f64),
    /// MONEY or SMALLMONEY, in ten-thousandths of a currency unit.
    Money(i64),
    /// DATETIME: days since 1900-01-01 and 1/300 second ticks since midnight.
    DateTime {
        /// Days since 1900-01-01.
        days: i32,
        /// Ticks of 1/300 second since midnight.
        ticks: u32,
    },
    /// SMALLDATETIME: days since 1900-01-01 and minutes since midnight.
    SmallDateTime {
        /// Days since 1900-01-01.
        days: u16,
        /// Minutes since midnight.
        minutes: u16,
    },
    /// Character data.
    String(String),
    /// Binary data.
    Binary(Bytes),
}

impl Value {
    /// Decode one value of `column` from a ROW token.
    pub fn decode(src: &mut impl Buf, column: &ColumnMetadata) -> Result<Self, ProtocolError> {
        let type_id = column.type_id;
        match type_id.value_length() {
            ValueLength::Fixed(size) => {
                let data = take(src, size)?;
                decode_sized(type_id, &data)
            }
            ValueLength::ByteLen => {
                let len = take(src, 1)?[0] as usize;
                if len == 0 {
                    return Ok(Self::Null);
                }
                let data = take(src, len)?;
                decode_sized(type_id, &data)
            }
            ValueLength::UShortLen => {
                if src.remaining() < 2 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let len = src.get_u16_le();
                if len == 0xFFFF {
                    return Ok(Self::Null);
                }
                let data = take(src, len as usize)?;
                decode_sized(type_id, &data)
            }
            ValueLength::TextPtr => {
                let pointer_len = take(src, 1)?[0] as usize;
                if pointer_len == 0 {
                    return Ok(Self::Null);
                }
                take(src, pointer_len + TEXT_TIMESTAMP_SIZE)?;
                if src.remaining() < 4 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let len = src.get_u32_le() as usize;
                let data = take(src, len)?;
                decode_sized(type_id, &data)
            }
        }
    }

    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an `i64` if it is any integer type.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::TinyInt(v) => Some(i64::from(v)),
            Self::SmallInt(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::BigInt(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as a string slice if it is character data.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", u8::from(*v)),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Money(v) => {
                let sign = if *v < 0 { "-" } else { "" };
                let abs = v.unsigned_abs();
                write!(f, "{sign}{}.{:04}", abs / 10_000, abs % 10_000)
            }
            Self::DateTime { days, ticks } => write!(f, "datetime({days}, {ticks})"),
            Self::SmallDateTime { days, minutes } => {
                write!(f, "smalldatetime({days}, {minutes})")
            }
            Self::String(s) => write!(f, "{s}"),
            Self::Binary(b) => {
                write!(f, "0x")?;
                for byte in b.iter() {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
        }
    }
}

fn take(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    if src.remaining() < len {
        return Err(ProtocolError::IncompletePacket {
            expected: len,
            actual: src.remaining(),
        });
    }
    Ok(src.copy_to_bytes(len))
}

/// Interpret `data`, whose length is already known, as a value of `type_id`.
fn decode_sized(type_id: TypeId, data: &[u8]) -> Result<Value, ProtocolError> {
    let mut buf = data;
    let len = data.len();

    let value = match type_id {
        TypeId::Null => Value::Null,
        TypeId::Bit | TypeId::BitN if len == 1 => Value::Bool(buf.get_u8() != 0),
        TypeId::Int1 | TypeId::IntN if len == 1 => Value::TinyInt(buf.get_u8()),
        TypeId::Int2 | TypeId::IntN if len == 2 => Value::SmallInt(buf.get_i16_le()),
        TypeId::Int4 | TypeId::IntN if len == 4 => Value::Int(buf.get_i32_le()),
        TypeId::Int8 | TypeId::IntN if len == 8 => Value::BigInt(buf.get_i64_le()),
        TypeId::Float4 | TypeId::FloatN if len == 4 => Value::Real(buf.get_f32_le()),
        TypeId::Float8 | TypeId::FloatN if len == 8 => Value::Float(buf.get_f64_le()),
        TypeId::Money4 | TypeId::MoneyN if len == 4 => Value::Money(i64::from(buf.get_i32_le())),
        TypeId::Money | TypeId::MoneyN if len == 8 => {
            let high = i64::from(buf.get_i32_le());
            let low = i64::from(buf.get_u32_le());
            Value::Money((high << 32) | low)
        }
        TypeId::DateTime4 | TypeId::DateTimeN if len == 4 => Value::SmallDateTime {
            days: buf.get_u16_le(),
            minutes: buf.get_u16_le(),
        },
        TypeId::DateTime | TypeId::DateTimeN if len == 8 => Value::DateTime {
            days: buf.get_i32_le(),
            ticks: buf.get_u32_le(),
        },
        TypeId::NChar | TypeId::NVarChar | TypeId::NText => Value::String(decode_utf16le(data)?),
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            Value::String(decode_single_byte(data))
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image => Value::Binary(Bytes::copy_from_slice(data)),
        _ => {
            return Err(ProtocolError::InvalidLength {
                context: type_name(type_id),
                length: len,
            });
        }
    };

    Ok(value)
}

fn type_name(type_id: TypeId) -> &'static str {
    match type_id {
        TypeId::Bit | TypeId::BitN => "bit",
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => "integer",
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => "float",
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => "money",
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => "datetime",
        _ => "value",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::TypeInfo;
    use crate::types::ColumnFlags;

    fn column(type_id: TypeId) -> ColumnMetadata {
        ColumnMetadata {
            name: "c".to_string(),
            type_id,
            flags: ColumnFlags::default(),
            user_type: 0,
            type_info: TypeInfo::default(),
        }
    }

    fn decode(type_id: TypeId, bytes: &[u8]) -> Result<Value, ProtocolError> {
        let mut src = bytes;
        let value = Value::decode(&mut src, &column(type_id))?;
        assert!(src.is_empty(), "value left {} bytes", src.len());
        Ok(value)
    }

    #[test]
    fn test_fixed_int4_is_little_endian_signed() {
        assert_eq!(decode(TypeId::Int4, &[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), Value::Int(-2));
        assert_eq!(decode(TypeId::Int4, &[0x2A, 0, 0, 0]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_fixed_types() {
        assert_eq!(decode(TypeId::Null, &[]).unwrap(), Value::Null);
        assert_eq!(decode(TypeId::Int1, &[0xFF]).unwrap(), Value::TinyInt(255));
        assert_eq!(decode(TypeId::Bit, &[1]).unwrap(), Value::Bool(true));
        assert_eq!(decode(TypeId::Int2, &[0x00, 0x80]).unwrap(), Value::SmallInt(i16::MIN));
        assert_eq!(
            decode(TypeId::Int8, &7i64.to_le_bytes()).unwrap(),
            Value::BigInt(7)
        );
        assert_eq!(
            decode(TypeId::Float8, &1.5f64.to_le_bytes()).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            decode(TypeId::DateTime4, &[0x01, 0x00, 0x3C, 0x00]).unwrap(),
            Value::SmallDateTime { days: 1, minutes: 60 }
        );
    }

    #[test]
    fn test_money_halves() {
        // 1.0000 = 10_000: high half 0, low half 10_000
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&10_000u32.to_le_bytes());
        let value = decode(TypeId::Money, &bytes).unwrap();
        assert_eq!(value, Value::Money(10_000));
        assert_eq!(value.to_string(), "1.0000");

        assert_eq!(
            decode(TypeId::Money4, &(-25i32).to_le_bytes()).unwrap().to_string(),
            "-0.0025"
        );
    }

    #[test]
    fn test_nullable_families() {
        assert_eq!(decode(TypeId::IntN, &[0]).unwrap(), Value::Null);
        assert_eq!(decode(TypeId::IntN, &[2, 0x10, 0x00]).unwrap(), Value::SmallInt(16));
        assert_eq!(decode(TypeId::BitN, &[1, 0]).unwrap(), Value::Bool(false));
        assert_eq!(
            decode(TypeId::FloatN, &[4, 0x00, 0x00, 0x80, 0x3F]).unwrap(),
            Value::Real(1.0)
        );
        assert!(matches!(
            decode(TypeId::IntN, &[3, 0, 0, 0]),
            Err(ProtocolError::InvalidLength { length: 3, .. })
        ));
    }

    #[test]
    fn test_character_columns() {
        assert_eq!(
            decode(TypeId::NVarChar, &[4, 0, b'h', 0, b'i', 0]).unwrap(),
            Value::String("hi".to_string())
        );
        assert_eq!(decode(TypeId::NVarChar, &[0xFF, 0xFF]).unwrap(), Value::Null);
        assert_eq!(
            decode(TypeId::BigVarChar, &[2, 0, b'o', b'k']).unwrap(),
            Value::String("ok".to_string())
        );
        assert_eq!(
            decode(TypeId::VarChar, &[3, b'a', b'b', b'c']).unwrap(),
            Value::String("abc".to_string())
        );
        assert_eq!(
            decode(TypeId::VarBinary, &[2, 0xDE, 0xAD]).unwrap().to_string(),
            "0xDEAD"
        );
    }

    #[test]
    fn test_text_pointer_values() {
        let mut bytes = vec![16];
        bytes.extend_from_slice(&[0xAB; 16]);
        bytes.extend_from_slice(&[0; 8]);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(b"hi");
        assert_eq!(
            decode(TypeId::Text, &bytes).unwrap(),
            Value::String("hi".to_string())
        );
        assert_eq!(decode(TypeId::Image, &[0]).unwrap(), Value::Null);
    }

    #[test]
    fn test_truncated_value() {
        let mut src = &[0x01, 0x02][..];
        assert!(Value::decode(&mut src, &column(TypeId::Int4)).is_err());
    }
}
