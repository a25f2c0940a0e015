//! Column data type definitions.
//!
//! Only the type codes the result decoder understands are listed here. A
//! type code outside this set is reported as an unsupported feature rather
//! than guessed at.

use crate::error::ProtocolError;

/// Column type identifiers as they appear in COLMETADATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types (no length prefix)
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit (boolean).
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 64-bit signed integer.
    Int8 = 0x7F,

    // Nullable families with a 1-byte length prefix
    /// Variable-length integer.
    IntN = 0x26,
    /// Variable-length bit.
    BitN = 0x68,
    /// Variable-length float.
    FloatN = 0x6D,
    /// Variable-length money.
    MoneyN = 0x6E,
    /// Variable-length datetime.
    DateTimeN = 0x6F,

    // Byte-counted types
    /// Variable-length binary.
    VarBinary = 0x25,
    /// Variable-length character.
    VarChar = 0x27,
    /// Fixed-length binary.
    Binary = 0x2D,
    /// Fixed-length character.
    Char = 0x2F,

    // Types with a 2-byte length
    /// Large variable-length binary.
    BigVarBinary = 0xA5,
    /// Large variable-length character.
    BigVarChar = 0xA7,
    /// Large fixed-length binary.
    BigBinary = 0xAD,
    /// Large fixed-length character.
    BigChar = 0xAF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,
    /// Fixed-length Unicode character.
    NChar = 0xEF,

    // Legacy large objects with a 4-byte length and a table name
    /// Image.
    Image = 0x22,
    /// Text.
    Text = 0x23,
    /// NText.
    NText = 0x63,
}

/// How a column value's length is carried in a ROW token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// No prefix; the type implies the size (zero for NULL).
    Fixed(usize),
    /// 1-byte length prefix, zero meaning NULL.
    ByteLen,
    /// 2-byte little-endian length prefix, `0xFFFF` meaning NULL.
    UShortLen,
    /// Text pointer followed by a 4-byte length.
    TextPtr,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x1F => Some(Self::Null),
            0x30 => Some(Self::Int1),
            0x32 => Some(Self::Bit),
            0x34 => Some(Self::Int2),
            0x38 => Some(Self::Int4),
            0x3A => Some(Self::DateTime4),
            0x3B => Some(Self::Float4),
            0x3C => Some(Self::Money),
            0x3D => Some(Self::DateTime),
            0x3E => Some(Self::Float8),
            0x7A => Some(Self::Money4),
            0x7F => Some(Self::Int8),
            0x26 => Some(Self::IntN),
            0x68 => Some(Self::BitN),
            0x6D => Some(Self::FloatN),
            0x6E => Some(Self::MoneyN),
            0x6F => Some(Self::DateTimeN),
            0x25 => Some(Self::VarBinary),
            0x27 => Some(Self::VarChar),
            0x2D => Some(Self::Binary),
            0x2F => Some(Self::Char),
            0xA5 => Some(Self::BigVarBinary),
            0xA7 => Some(Self::BigVarChar),
            0xAD => Some(Self::BigBinary),
            0xAF => Some(Self::BigChar),
            0xE7 => Some(Self::NVarChar),
            0xEF => Some(Self::NChar),
            0x22 => Some(Self::Image),
            0x23 => Some(Self::Text),
            0x63 => Some(Self::NText),
            _ => None,
        }
    }

    /// Like [`TypeId::from_u8`], failing with `UnsupportedFeature` for codes
    /// the decoder does not handle.
    pub fn try_from_u8(value: u8) -> Result<Self, ProtocolError> {
        Self::from_u8(value).ok_or_else(|| {
            ProtocolError::unsupported(format!("column type 0x{value:02X}"))
        })
    }

    /// Length class of a value of this type.
    #[must_use]
    pub const fn value_length(self) -> ValueLength {
        match self {
            Self::Null => ValueLength::Fixed(0),
            Self::Int1 | Self::Bit => ValueLength::Fixed(1),
            Self::Int2 => ValueLength::Fixed(2),
            Self::Int4 | Self::DateTime4 | Self::Float4 | Self::Money4 => ValueLength::Fixed(4),
            Self::Money | Self::DateTime | Self::Float8 | Self::Int8 => ValueLength::Fixed(8),
            Self::IntN
            | Self::BitN
            | Self::FloatN
            | Self::MoneyN
            | Self::DateTimeN
            | Self::VarBinary
            | Self::VarChar
            | Self::Binary
            | Self::Char => ValueLength::ByteLen,
            Self::BigVarBinary
            | Self::BigVarChar
            | Self::BigBinary
            | Self::BigChar
            | Self::NVarChar
            | Self::NChar => ValueLength::UShortLen,
            Self::Image | Self::Text | Self::NText => ValueLength::TextPtr,
        }
    }

    /// Check if this is a fixed-length type.
    #[must_use]
    pub const fn is_fixed_length(self) -> bool {
        matches!(self.value_length(), ValueLength::Fixed(_))
    }

    /// Get the fixed size of this type in bytes, if applicable.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self.value_length() {
            ValueLength::Fixed(size) => Some(size),
            _ => None,
        }
    }

    /// Check if values of this type are UTF-16 text.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if values of this type are single-byte text.
    #[must_use]
    pub const fn is_char(self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::BigChar | Self::BigVarChar | Self::Text
        )
    }

    /// Check if COLMETADATA carries a collation for this type.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigChar | Self::BigVarChar | Self::NChar | Self::NVarChar | Self::Text | Self::NText
        )
    }
}

/// Column flags from COLMETADATA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    /// Column is nullable.
    pub nullable: bool,
    /// Column allows case-sensitive comparison.
    pub case_sensitive: bool,
    /// Column is updateable.
    pub updateable: Updateable,
    /// Column is an identity column.
    pub identity: bool,
    /// Column is computed.
    pub computed: bool,
}

/// Update mode for a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Updateable {
    /// Column is read-only.
    #[default]
    ReadOnly,
    /// Column is read-write.
    ReadWrite,
    /// Updateability unknown.
    Unknown,
}

impl ColumnFlags {
    /// Parse column flags from the 2-byte flags field.
    #[must_use]
    pub fn from_bits(flags: u16) -> Self {
        Self {
            nullable: (flags & 0x0001) != 0,
            case_sensitive: (flags & 0x0002) != 0,
            updateable: match (flags >> 2) & 0x03 {
                0 => Updateable::ReadOnly,
                1 => Updateable::ReadWrite,
                _ => Updateable::Unknown,
            },
            identity: (flags & 0x0010) != 0,
            computed: (flags & 0x0020) != 0,
        }
    }

    /// Convert flags back to bits.
    #[must_use]
    pub fn to_bits(&self) -> u16 {
        let mut flags = 0u16;
        if self.nullable {
            flags |= 0x0001;
        }
        if self.case_sensitive {
            flags |= 0x0002;
        }
        flags |= match self.updateable {
            Updateable::ReadOnly => 0,
            Updateable::ReadWrite => 1 << 2,
            Updateable::Unknown => 2 << 2,
        };
        if self.identity {
            flags |= 0x0010;
        }
        if self.computed {
            flags |= 0x0020;
        }
        flags
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(0x38), Some(TypeId::Int4));
        assert_eq!(TypeId::from_u8(0xE7), Some(TypeId::NVarChar));
        assert_eq!(TypeId::from_u8(0x99), None);
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        // DATE is outside the decoded subset
        assert!(TypeId::try_from_u8(0x28).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_value_length_classes() {
        assert_eq!(TypeId::Null.value_length(), ValueLength::Fixed(0));
        assert_eq!(TypeId::Int4.fixed_size(), Some(4));
        assert_eq!(TypeId::Int8.fixed_size(), Some(8));
        assert_eq!(TypeId::IntN.value_length(), ValueLength::ByteLen);
        assert_eq!(TypeId::NVarChar.value_length(), ValueLength::UShortLen);
        assert_eq!(TypeId::Text.value_length(), ValueLength::TextPtr);
        assert!(!TypeId::NVarChar.is_fixed_length());
    }

    #[test]
    fn test_column_flags_roundtrip() {
        let flags = ColumnFlags {
            nullable: true,
            identity: true,
            updateable: Updateable::ReadWrite,
            ..Default::default()
        };
        assert_eq!(flags.to_bits(), 0x0015);
        assert_eq!(ColumnFlags::from_bits(flags.to_bits()), flags);
    }
}
