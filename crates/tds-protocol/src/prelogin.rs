//! Pre-login message handling.
//!
//! The pre-login message is the first exchange on a connection. It is an
//! option table of `(token, offset, length)` entries with big-endian offsets
//! and lengths, a terminator byte, and the concatenated option data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::version::ProductVersion;

/// Size of one option table entry: token, offset and length.
const OPTION_ENTRY_SIZE: usize = 5;

/// Pre-login option tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption capability.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Client thread ID.
    ThreadId = 0x03,
    /// Multiple active result sets flag.
    Mars = 0x04,
    /// Trace ID.
    TraceId = 0x05,
    /// End of the option table.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption capability advertised in pre-login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encryption available but off.
    Off = 0x00,
    /// Encryption on.
    On = 0x01,
    /// Encryption not available.
    #[default]
    NotSupported = 0x02,
    /// Encryption required.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value; unknown values read as `Off`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            0x03 => Self::Required,
            _ => Self::Off,
        }
    }

    /// Whether this level demands an encrypted channel.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self, Self::On | Self::Required)
    }
}

/// Trace identifier: activity GUID plus sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId {
    /// Activity ID.
    pub activity_id: [u8; 16],
    /// Activity sequence.
    pub activity_sequence: u32,
}

/// Pre-login request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreLogin {
    /// Client or server product version.
    pub version: ProductVersion,
    /// Encryption capability.
    pub encryption: EncryptionLevel,
    /// Instance name.
    pub instance: Option<String>,
    /// Client thread ID.
    pub thread_id: Option<u32>,
    /// MARS flag. Negotiated but never enabled by this client.
    pub mars: bool,
    /// Trace ID.
    pub trace_id: Option<TraceId>,
}

impl Default for PreLogin {
    fn default() -> Self {
        Self::new()
    }
}

impl PreLogin {
    /// Create a pre-login message with the client defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: ProductVersion::CLIENT_DEFAULT,
            encryption: EncryptionLevel::default(),
            instance: None,
            thread_id: None,
            mars: false,
            trace_id: None,
        }
    }

    /// Set the product version.
    #[must_use]
    pub fn with_version(mut self, version: ProductVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the MARS flag.
    #[must_use]
    pub fn with_mars(mut self, enabled: bool) -> Self {
        self.mars = enabled;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the client thread ID.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the trace ID.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    fn options(&self) -> Vec<(PreLoginOption, Bytes)> {
        let mut options = vec![
            (
                PreLoginOption::Version,
                Bytes::copy_from_slice(&self.version.to_bytes()),
            ),
            (
                PreLoginOption::Encryption,
                Bytes::copy_from_slice(&[self.encryption as u8]),
            ),
        ];

        if let Some(ref instance) = self.instance {
            let mut data = BytesMut::with_capacity(instance.len() + 1);
            data.put_slice(instance.as_bytes());
            data.put_u8(0);
            options.push((PreLoginOption::Instance, data.freeze()));
        }

        if let Some(thread_id) = self.thread_id {
            options.push((
                PreLoginOption::ThreadId,
                Bytes::copy_from_slice(&thread_id.to_be_bytes()),
            ));
        }

        options.push((
            PreLoginOption::Mars,
            Bytes::copy_from_slice(&[u8::from(self.mars)]),
        ));

        if let Some(ref trace_id) = self.trace_id {
            let mut data = BytesMut::with_capacity(36);
            data.put_slice(&trace_id.activity_id);
            data.put_u32_le(trace_id.activity_sequence);
            data.put_slice(&[0u8; 16]);
            options.push((PreLoginOption::TraceId, data.freeze()));
        }

        options
    }

    /// Encode the message.
    ///
    /// Offsets are computed in one forward pass starting at
    /// `options * 5 + 1`, the first byte after the terminator. Fails with
    /// `InvalidArgument` when an offset or length does not fit 16 bits.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let options = self.options();
        let table_size = options.len() * OPTION_ENTRY_SIZE + 1;
        let data_size: usize = options.iter().map(|(_, data)| data.len()).sum();

        let mut buf = BytesMut::with_capacity(table_size + data_size);
        let mut offset = table_size;
        for (option, data) in &options {
            let option = *option as u8;
            let position = u16::try_from(offset).map_err(|_| {
                ProtocolError::invalid_argument(format!(
                    "pre-login option 0x{option:02X} offset {offset} exceeds 65535"
                ))
            })?;
            let length = u16::try_from(data.len()).map_err(|_| {
                ProtocolError::invalid_argument(format!(
                    "pre-login option 0x{option:02X} length {} exceeds 65535",
                    data.len()
                ))
            })?;
            buf.put_u8(option);
            buf.put_u16(position);
            buf.put_u16(length);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);

        for (_, data) in &options {
            buf.put_slice(data);
        }

        Ok(buf.freeze())
    }

    /// Decode a pre-login message.
    ///
    /// Decoding is lenient: options whose data lies outside the buffer, or
    /// whose offsets point back into the table, are ignored and keep their
    /// defaults. A table that is itself truncated is an error.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let mut prelogin = Self::new();
        prelogin.encryption = EncryptionLevel::Off;

        let mut options = Vec::new();
        loop {
            if src.remaining() < 1 {
                return Err(ProtocolError::UnexpectedEof);
            }

            let option_type = src.get_u8();
            if option_type == PreLoginOption::Terminator as u8 {
                break;
            }

            if src.remaining() < 4 {
                return Err(ProtocolError::UnexpectedEof);
            }

            let offset = src.get_u16();
            let length = src.get_u16();
            options.push((PreLoginOption::from_u8(option_type)?, offset, length));
        }

        let data = src.copy_to_bytes(src.remaining());
        let table_size = options.len() * OPTION_ENTRY_SIZE + 1;

        for (option, offset, length) in options {
            let offset = offset as usize;
            let length = length as usize;

            if offset < table_size {
                continue;
            }
            let start = offset - table_size;
            if start + length > data.len() {
                continue;
            }
            let value = &data[start..start + length];

            match option {
                PreLoginOption::Version => {
                    if let Some(version) = ProductVersion::from_bytes(value) {
                        prelogin.version = version;
                    }
                }
                PreLoginOption::Encryption if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(value[0]);
                }
                PreLoginOption::Mars if length >= 1 => {
                    prelogin.mars = value[0] != 0;
                }
                PreLoginOption::Instance => {
                    let name = value.split(|&b| b == 0).next().unwrap_or_default();
                    if let Ok(s) = core::str::from_utf8(name) {
                        if !s.is_empty() {
                            prelogin.instance = Some(s.to_string());
                        }
                    }
                }
                PreLoginOption::ThreadId if length >= 4 => {
                    prelogin.thread_id =
                        Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
                }
                PreLoginOption::TraceId if length >= 20 => {
                    let mut activity_id = [0u8; 16];
                    activity_id.copy_from_slice(&value[..16]);
                    prelogin.trace_id = Some(TraceId {
                        activity_id,
                        activity_sequence: u32::from_le_bytes([
                            value[16], value[17], value[18], value[19],
                        ]),
                    });
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_bytes() {
        let encoded = PreLogin::new()
            .with_encryption(EncryptionLevel::Off)
            .encode()
            .unwrap();
        assert_eq!(
            &encoded[..],
            &[
                0x00, 0x00, 0x10, 0x00, 0x06, // version at 16, 6 bytes
                0x01, 0x00, 0x16, 0x00, 0x01, // encryption at 22, 1 byte
                0x04, 0x00, 0x17, 0x00, 0x01, // mars at 23, 1 byte
                0xFF, // terminator
                0x09, 0x00, 0x00, 0x00, 0x00, 0x00, // version 9.0.0.0
                0x00, // encryption off
                0x00, // mars off
            ]
        );
    }

    #[test]
    fn test_offsets_accumulate_with_optional_options() {
        let encoded = PreLogin::new()
            .with_instance("SQLEXPRESS")
            .with_thread_id(42)
            .encode()
            .unwrap();
        // version, encryption, instance, thread id, mars
        let table_size = 5 * 5 + 1;
        assert_eq!(u16::from_be_bytes([encoded[1], encoded[2]]), table_size);
        assert_eq!(encoded[10], PreLoginOption::Instance as u8);
        assert_eq!(u16::from_be_bytes([encoded[11], encoded[12]]), table_size + 7);
        assert_eq!(u16::from_be_bytes([encoded[13], encoded[14]]), 11);
        assert_eq!(encoded[15], PreLoginOption::ThreadId as u8);
        assert_eq!(
            u16::from_be_bytes([encoded[16], encoded[17]]),
            table_size + 7 + 11
        );
        assert_eq!(encoded.len(), table_size as usize + 6 + 1 + 11 + 4 + 1);
    }

    #[test]
    fn test_prelogin_decode_roundtrip() {
        let original = PreLogin::new()
            .with_version(ProductVersion::new(15, 0, 2000, 5))
            .with_encryption(EncryptionLevel::On)
            .with_instance("MSSQLSERVER")
            .with_thread_id(0xDEAD)
            .with_mars(true)
            .with_trace_id(TraceId {
                activity_id: [7u8; 16],
                activity_sequence: 3,
            });

        let decoded = PreLogin::decode(original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_oversized_instance_is_rejected() {
        let err = PreLogin::new()
            .with_instance("i".repeat(70_000))
            .encode()
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_decode_reads_from_declared_offsets() {
        let mut buf = BytesMut::new();
        let table_size: u16 = 11;

        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(table_size);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(table_size + 1);
        buf.put_u16(6);
        buf.put_u8(PreLoginOption::Terminator as u8);
        buf.put_u8(0x03);
        buf.put_slice(&[0x0F, 0x00, 0x07, 0xD0, 0x00, 0x00]);

        let decoded = PreLogin::decode(buf.freeze()).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Required);
        assert_eq!(decoded.version, ProductVersion::new(15, 0, 2000, 0));
    }

    #[test]
    fn test_decode_ignores_out_of_range_data() {
        // payload of the single-packet response used in the handshake tests
        let payload = [
            0x00, 0x00, 0x10, 0x00, 0x06, 0x01, 0x00, 0x16, 0x00, 0x01, 0x04, 0x00, 0x17, 0x00,
            0x01, 0xFF, 0x0A, 0x32, 0x09, 0xC4,
        ];
        let decoded = PreLogin::decode(&payload[..]).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::Off);
        assert!(!decoded.mars);
    }

    #[test]
    fn test_decode_truncated_table() {
        assert_eq!(
            PreLogin::decode(&[0x00, 0x00][..]).unwrap_err(),
            ProtocolError::UnexpectedEof
        );
        assert_eq!(
            PreLogin::decode(&[0x09, 0x00, 0x10, 0x00, 0x01, 0xFF][..]).unwrap_err(),
            ProtocolError::InvalidPreloginOption(0x09)
        );
    }

    #[test]
    fn test_encryption_level() {
        assert!(EncryptionLevel::Required.is_required());
        assert!(EncryptionLevel::On.is_required());
        assert!(!EncryptionLevel::Off.is_required());
        assert!(!EncryptionLevel::NotSupported.is_required());
        assert_eq!(EncryptionLevel::from_u8(0x02), EncryptionLevel::NotSupported);
    }
}
