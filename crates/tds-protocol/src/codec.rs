//! String and buffer helpers shared by the message encoders and decoders.
//!
//! Text on the wire is UTF-16LE. Length prefixes count UTF-16 code units,
//! not bytes.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Read a UTF-16LE string with a 1-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 1 {
        return None;
    }
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string with a 2-byte little-endian character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Option<String> {
    if src.remaining() < 2 {
        return None;
    }
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Option<String> {
    let byte_count = char_count * 2;
    if src.remaining() < byte_count {
        return None;
    }

    let mut chars = Vec::with_capacity(char_count);
    for _ in 0..char_count {
        chars.push(src.get_u16_le());
    }

    String::from_utf16(&chars).ok()
}

/// Write a UTF-16LE string with a 1-byte character count, truncating at 255.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(255) as u8;
    dst.put_u8(len);
    for &c in &chars[..len as usize] {
        dst.put_u16_le(c);
    }
}

/// Write a UTF-16LE string with a 2-byte character count, truncating at 65535.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(65535) as u16;
    dst.put_u16_le(len);
    for &c in &chars[..len as usize] {
        dst.put_u16_le(c);
    }
}

/// Write a UTF-16LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Encode a string as UTF-16LE bytes.
#[must_use]
pub fn encode_utf16le(s: &str) -> Bytes {
    let mut buf = Vec::with_capacity(utf16_byte_len(s));
    write_utf16_string(&mut buf, s);
    Bytes::from(buf)
}

/// Decode UTF-16LE bytes. An odd byte count or unpaired surrogate is an error.
pub fn decode_utf16le(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(format!(
            "odd UTF-16 byte length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| ProtocolError::StringEncoding("invalid UTF-16 sequence".to_string()))
}

/// Decode single-byte text, mapping each byte to the code point of the same value.
#[must_use]
pub fn decode_single_byte(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Number of bytes a string occupies once encoded as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Number of UTF-16 code units in a string.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}
