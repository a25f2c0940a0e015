//! TDS packet codec implementation.

use bytes::{BufMut, BytesMut};
use tds_protocol::ProtocolError;
use tds_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, Packet, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// TDS packet codec for tokio-util framing.
///
/// Decoding splits a byte stream into [`Packet`]s. Encoding writes packets
/// as they come out of [`tds_protocol::frame`]: the sequence id in the
/// header is kept, only the length field is recomputed.
#[derive(Debug, Clone)]
pub struct TdsCodec {
    /// Maximum packet size to accept or emit.
    max_packet_size: usize,
}

impl TdsCodec {
    /// Create a new TDS codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }

    /// Create a new TDS codec with a custom maximum packet size.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.clamp(PACKET_HEADER_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Largest packet this codec accepts.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn peek_header(&self, src: &[u8]) -> Result<PacketHeader, CodecError> {
        let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
        let length = header.length as usize;

        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }
        Ok(header)
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let header = self.peek_header(&src[..])?;
        let length = header.length as usize;

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet_bytes = src.split_to(length);
        let payload = packet_bytes.split_off(PACKET_HEADER_SIZE).freeze();

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = length,
            packet_id = header.packet_id,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        if src.is_empty() {
            return Ok(None);
        }

        if src.len() >= PACKET_HEADER_SIZE {
            let header = self.peek_header(&src[..])?;
            if header.is_end_of_message() {
                let declared = header.payload_length();
                let payload = src.split_off(PACKET_HEADER_SIZE).freeze();
                src.clear();

                tracing::warn!(
                    packet_type = ?header.packet_type,
                    declared = declared,
                    received = payload.len(),
                    "accepting truncated final packet at end of stream"
                );
                return Ok(Some(Packet::new(header, payload)));
            }

            let expected = header.length as usize;
            let actual = src.len();
            src.clear();
            return Err(ProtocolError::IncompletePacket { expected, actual }.into());
        }

        let actual = src.len();
        src.clear();
        Err(ProtocolError::IncompletePacket {
            expected: PACKET_HEADER_SIZE,
            actual,
        }
        .into())
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();

        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);

        let mut header = item.header;
        header.length = total_length as u16;
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tds_protocol::packet::{PacketStatus, PacketType};

    fn raw_packet(status: u8, length: u16, payload: &[u8]) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(status);
        data.put_u16(length);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x01, 12, b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::TabularResult);
        assert!(packet.header.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_two_packets_in_one_buffer() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x00, 10, b"ab");
        data.extend_from_slice(&raw_packet(0x01, 9, b"c"));

        let first = codec.decode(&mut data).unwrap().unwrap();
        let second = codec.decode(&mut data).unwrap().unwrap();
        assert!(!first.is_end_of_message());
        assert!(second.is_end_of_message());
        assert_eq!(&second.payload[..], b"c");
    }

    #[test]
    fn test_encode_keeps_sequence_id() {
        let mut codec = TdsCodec::new();

        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0)
            .with_packet_id(42);
        let packet = Packet::new(header, Bytes::from_static(b"test"));

        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();

        assert_eq!(&dst[..8], &[0x01, 0x01, 0x00, 0x0C, 0x00, 0x00, 42, 0x00]);
        assert_eq!(&dst[8..], b"test");
    }

    #[test]
    fn test_incomplete_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x01, 12, b"");

        assert!(codec.decode(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_invalid_status_rejected() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x04, 12, b"test");

        let err = codec.decode(&mut data).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::InvalidPacketStatus(0x04))
        ));
    }

    #[test]
    fn test_length_below_header_rejected() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x01, 4, b"");

        assert!(matches!(
            codec.decode(&mut data).unwrap_err(),
            CodecError::InvalidHeader
        ));
    }

    #[test]
    fn test_packet_too_large() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(0x01, 4096, b"");

        assert!(matches!(
            codec.decode(&mut data).unwrap_err(),
            CodecError::PacketTooLarge {
                size: 4096,
                max: 512
            }
        ));
    }

    #[test]
    fn test_truncated_final_packet_accepted_at_eof() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x01, 32, &[0xAB; 20]);

        let packet = codec.decode_eof(&mut data).unwrap().unwrap();
        assert!(packet.is_end_of_message());
        assert_eq!(packet.payload.len(), 20);
        assert_eq!(packet.header.length, 32);
        assert!(codec.decode_eof(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_truncated_intermediate_packet_rejected_at_eof() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(0x00, 32, &[0xAB; 20]);

        let err = codec.decode_eof(&mut data).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Protocol(ProtocolError::IncompletePacket {
                expected: 32,
                actual: 28
            })
        ));
    }

    #[test]
    fn test_partial_header_rejected_at_eof() {
        let mut codec = TdsCodec::new();
        let mut data = BytesMut::from(&[0x04, 0x01, 0x00][..]);

        assert!(codec.decode_eof(&mut data).is_err());
        assert!(data.is_empty());
    }
}
