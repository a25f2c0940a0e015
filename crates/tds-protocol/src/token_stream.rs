//! Self-describing token records.
//!
//! Each record starts with a definition byte whose bits 4-5 select how the
//! record's length is encoded:
//!
//! | bits 4-5 | class          | payload                                  |
//! |----------|----------------|------------------------------------------|
//! | `00`     | variable-count | not supported                            |
//! | `01`     | fixed          | 1, 2, 4 or 8 bytes, chosen by bits 2-3   |
//! | `10`     | variable       | `u16` little-endian length, then data    |
//! | `11`     | zero-length    | none                                     |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Bits of the definition byte that carry the length class.
pub const LENGTH_CLASS_MASK: u8 = 0x30;

/// Bits of the definition byte that select a fixed payload size.
pub const FIXED_SIZE_MASK: u8 = 0x0C;

/// Payload size of a fixed-length record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixedSize {
    /// One byte (selector `00`).
    One,
    /// Two bytes (selector `01`).
    Two,
    /// Four bytes (selector `10`).
    Four,
    /// Eight bytes (selector `11`).
    Eight,
}

impl FixedSize {
    /// Decode the size selector from bits 2-3 of a definition byte.
    #[must_use]
    pub const fn from_definition(definition: u8) -> Self {
        match (definition & FIXED_SIZE_MASK) >> 2 {
            0 => Self::One,
            1 => Self::Two,
            2 => Self::Four,
            _ => Self::Eight,
        }
    }

    /// Size for a payload of `len` bytes, if it is one of the legal sizes.
    #[must_use]
    pub const fn from_len(len: usize) -> Option<Self> {
        match len {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            8 => Some(Self::Eight),
            _ => None,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Selector bits, already shifted into position 2-3.
    #[must_use]
    pub const fn selector(self) -> u8 {
        match self {
            Self::One => 0x00,
            Self::Two => 0x04,
            Self::Four => 0x08,
            Self::Eight => 0x0C,
        }
    }
}

/// How a record's payload length is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthClass {
    /// Count-prefixed records. Recognised but never decoded.
    VariableCount,
    /// Fixed payload of the given size.
    Fixed(FixedSize),
    /// Payload preceded by a two-byte length.
    Variable,
    /// No payload.
    Zero,
}

impl LengthClass {
    /// Classify a definition byte.
    #[must_use]
    pub const fn from_definition(definition: u8) -> Self {
        match (definition & LENGTH_CLASS_MASK) >> 4 {
            0b00 => Self::VariableCount,
            0b01 => Self::Fixed(FixedSize::from_definition(definition)),
            0b10 => Self::Variable,
            _ => Self::Zero,
        }
    }

    /// Class bits, already shifted into position 4-5.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::VariableCount => 0x00,
            Self::Fixed(_) => 0x10,
            Self::Variable => 0x20,
            Self::Zero => 0x30,
        }
    }
}

/// One record of a token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken {
    /// Definition byte, including length-class and size-selector bits.
    pub definition: u8,
    /// Payload.
    pub data: Bytes,
}

impl StreamToken {
    /// A zero-length record. The class bits of `definition` are forced to `11`.
    #[must_use]
    pub fn zero(definition: u8) -> Self {
        Self {
            definition: (definition & !LENGTH_CLASS_MASK) | LengthClass::Zero.bits(),
            data: Bytes::new(),
        }
    }

    /// A fixed-length record. The class and size bits are derived from `data`.
    pub fn fixed(definition: u8, data: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let data = data.into();
        let size = FixedSize::from_len(data.len()).ok_or_else(|| {
            ProtocolError::invalid_argument(format!(
                "fixed-length token payload must be 1, 2, 4 or 8 bytes, got {}",
                data.len()
            ))
        })?;
        let definition = (definition & !(LENGTH_CLASS_MASK | FIXED_SIZE_MASK))
            | LengthClass::Fixed(size).bits()
            | size.selector();
        Ok(Self { definition, data })
    }

    /// A variable-length record. The class bits of `definition` are forced to `10`.
    pub fn variable(definition: u8, data: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let data = data.into();
        if data.len() > usize::from(u16::MAX) {
            return Err(ProtocolError::invalid_argument(format!(
                "variable-length token payload of {} bytes exceeds 65535",
                data.len()
            )));
        }
        Ok(Self {
            definition: (definition & !LENGTH_CLASS_MASK) | LengthClass::Variable.bits(),
            data,
        })
    }

    /// Length class carried by the definition byte.
    #[must_use]
    pub fn length_class(&self) -> LengthClass {
        LengthClass::from_definition(self.definition)
    }

    /// Decode one record.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if !src.has_remaining() {
            return Err(ProtocolError::UnexpectedEof);
        }
        let definition = src.get_u8();

        let data = match LengthClass::from_definition(definition) {
            LengthClass::VariableCount => {
                return Err(ProtocolError::unsupported(format!(
                    "variable-count token 0x{definition:02X}"
                )));
            }
            LengthClass::Fixed(size) => take(src, size.len())?,
            LengthClass::Variable => {
                if src.remaining() < 2 {
                    return Err(ProtocolError::IncompletePacket {
                        expected: 2,
                        actual: src.remaining(),
                    });
                }
                let len = src.get_u16_le() as usize;
                take(src, len)?
            }
            LengthClass::Zero => Bytes::new(),
        };

        Ok(Self { definition, data })
    }

    /// Encode one record.
    ///
    /// Fixed-length records get their size selector rewritten to match the
    /// payload; a payload whose length is not 1, 2, 4 or 8 is rejected.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        match self.length_class() {
            LengthClass::VariableCount => Err(ProtocolError::unsupported(format!(
                "variable-count token 0x{:02X}",
                self.definition
            ))),
            LengthClass::Fixed(_) => {
                let normalized = Self::fixed(self.definition, self.data.clone())?;
                dst.put_u8(normalized.definition);
                dst.put_slice(&self.data);
                Ok(())
            }
            LengthClass::Variable => {
                let len = u16::try_from(self.data.len()).map_err(|_| {
                    ProtocolError::invalid_argument(format!(
                        "variable-length token payload of {} bytes exceeds 65535",
                        self.data.len()
                    ))
                })?;
                dst.put_u8(self.definition);
                dst.put_u16_le(len);
                dst.put_slice(&self.data);
                Ok(())
            }
            LengthClass::Zero => {
                if !self.data.is_empty() {
                    return Err(ProtocolError::invalid_argument(format!(
                        "zero-length token 0x{:02X} carries {} bytes",
                        self.definition,
                        self.data.len()
                    )));
                }
                dst.put_u8(self.definition);
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

/// Decode every record in `data`. An empty buffer yields no records.
pub fn decode_tokens(data: &[u8]) -> Result<Vec<StreamToken>, ProtocolError> {
    let mut src = data;
    let mut tokens = Vec::new();
    while src.has_remaining() {
        tokens.push(StreamToken::decode(&mut src)?);
    }
    Ok(tokens)
}

/// Encode a sequence of records into one buffer.
pub fn encode_tokens(tokens: &[StreamToken]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    for token in tokens {
        token.encode(&mut buf)?;
    }
    Ok(buf.freeze())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ZERO: u8 = 0x30;
    const FIXED: u8 = 0x10;
    const VARIABLE: u8 = 0x20;

    #[test]
    fn test_length_class_from_definition() {
        assert_eq!(LengthClass::from_definition(0x00), LengthClass::VariableCount);
        assert_eq!(LengthClass::from_definition(0x81), LengthClass::VariableCount);
        assert_eq!(
            LengthClass::from_definition(FIXED),
            LengthClass::Fixed(FixedSize::One)
        );
        assert_eq!(
            LengthClass::from_definition(FIXED | 0x04),
            LengthClass::Fixed(FixedSize::Two)
        );
        assert_eq!(
            LengthClass::from_definition(FIXED | 0x08),
            LengthClass::Fixed(FixedSize::Four)
        );
        assert_eq!(
            LengthClass::from_definition(FIXED | 0x0C),
            LengthClass::Fixed(FixedSize::Eight)
        );
        assert_eq!(LengthClass::from_definition(VARIABLE), LengthClass::Variable);
        assert_eq!(LengthClass::from_definition(ZERO), LengthClass::Zero);
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode_tokens(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_zero_and_fixed() {
        let raw = [
            ZERO,
            FIXED,
            0xFF,
            FIXED | 0x04,
            0xFE,
            0xFD,
            FIXED | 0x08,
            0xFC,
            0xFB,
            0xFA,
            0xF9,
            FIXED | 0x0C,
            0xF8,
            0xF7,
            0xF6,
            0xF5,
            0xF4,
            0xF3,
            0xF2,
            0xF1,
        ];
        let tokens = decode_tokens(&raw).unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0].definition, ZERO);
        assert!(tokens[0].data.is_empty());
        assert_eq!(tokens[1].definition, FIXED);
        assert_eq!(&tokens[1].data[..], &[0xFF]);
        assert_eq!(tokens[2].definition, FIXED | 0x04);
        assert_eq!(&tokens[2].data[..], &[0xFE, 0xFD]);
        assert_eq!(tokens[3].definition, FIXED | 0x08);
        assert_eq!(&tokens[3].data[..], &[0xFC, 0xFB, 0xFA, 0xF9]);
        assert_eq!(tokens[4].definition, FIXED | 0x0C);
        assert_eq!(tokens[4].data.len(), 8);
    }

    #[test]
    fn test_encode_sets_size_selector() {
        let tokens = vec![
            StreamToken {
                definition: FIXED,
                data: Bytes::from_static(&[0xFE, 0xFD]),
            },
            StreamToken {
                definition: FIXED,
                data: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
            },
        ];
        let raw = encode_tokens(&tokens).unwrap();
        assert_eq!(raw[0], FIXED | 0x04);
        assert_eq!(raw[3], FIXED | 0x0C);

        let decoded = decode_tokens(&raw).unwrap();
        assert_eq!(decoded[0].definition, FIXED | 0x04);
        assert_eq!(decoded[1].definition, FIXED | 0x0C);
    }

    #[test]
    fn test_variable_length_prefix_is_little_endian() {
        let token = StreamToken::variable(VARIABLE, &b"Teststring, hello world!"[..]).unwrap();
        let raw = encode_tokens(std::slice::from_ref(&token)).unwrap();
        assert_eq!(&raw[..3], &[VARIABLE, 24, 0]);
        assert_eq!(decode_tokens(&raw).unwrap(), vec![token]);
    }

    #[test]
    fn test_mixed_stream_roundtrip() {
        let tokens = vec![
            StreamToken::fixed(FIXED, vec![0xFF]).unwrap(),
            StreamToken::variable(VARIABLE, &b"Teststring, hello world!"[..]).unwrap(),
            StreamToken::fixed(FIXED | 0x04, vec![0xFE, 0xFD]).unwrap(),
            StreamToken::variable(VARIABLE, &b"Another teststring"[..]).unwrap(),
            StreamToken::variable(VARIABLE, vec![0xF8, 0xF7, 0xF6, 0xF5, 0xF4, 0xF3, 0xF2, 0xF1])
                .unwrap(),
            StreamToken::zero(ZERO),
        ];
        let raw = encode_tokens(&tokens).unwrap();
        assert_eq!(decode_tokens(&raw).unwrap(), tokens);
    }

    #[test]
    fn test_variable_count_is_unsupported() {
        let err = decode_tokens(&[0x81, 0x01, 0x00]).unwrap_err();
        assert!(err.is_unsupported());

        let token = StreamToken {
            definition: 0x00,
            data: Bytes::new(),
        };
        assert!(encode_tokens(&[token]).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_bad_fixed_size_is_invalid_argument() {
        assert!(StreamToken::fixed(FIXED, vec![0u8; 3]).unwrap_err().is_invalid_argument());

        let token = StreamToken {
            definition: FIXED,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(encode_tokens(&[token]).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_zero_length_with_data_rejected() {
        let token = StreamToken {
            definition: ZERO,
            data: Bytes::from_static(&[1]),
        };
        assert!(encode_tokens(&[token]).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_truncated_input_is_fatal() {
        // fixed 4-byte token with only two bytes present
        assert!(matches!(
            decode_tokens(&[FIXED | 0x08, 1, 2]),
            Err(ProtocolError::IncompletePacket { expected: 4, actual: 2 })
        ));
        // variable token missing half its prefix
        assert!(matches!(
            decode_tokens(&[VARIABLE, 5]),
            Err(ProtocolError::IncompletePacket { expected: 2, actual: 1 })
        ));
        // variable token whose data runs past the buffer
        assert!(matches!(
            decode_tokens(&[VARIABLE, 5, 0, b'a', b'b']),
            Err(ProtocolError::IncompletePacket { expected: 5, actual: 2 })
        ));
    }

    fn arb_token() -> impl Strategy<Value = StreamToken> {
        let high = any::<u8>().prop_map(|b| b & 0xC3);
        prop_oneof![
            high.clone().prop_map(StreamToken::zero),
            (
                high.clone(),
                prop_oneof![Just(1usize), Just(2), Just(4), Just(8)]
                    .prop_flat_map(|n| proptest::collection::vec(any::<u8>(), n))
            )
                .prop_map(|(def, data)| StreamToken::fixed(def, data).unwrap()),
            (high, proptest::collection::vec(any::<u8>(), 0..300))
                .prop_map(|(def, data)| StreamToken::variable(def, data).unwrap()),
        ]
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(tokens in proptest::collection::vec(arb_token(), 0..20)) {
            let raw = encode_tokens(&tokens).unwrap();
            prop_assert_eq!(decode_tokens(&raw).unwrap(), tokens);
        }
    }
}
