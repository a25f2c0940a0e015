//! Packet header definitions and message framing.
//!
//! A message is carried on the wire as one or more packets, each holding an
//! 8-byte big-endian header followed by a slice of the message payload. Only
//! the final packet of a message has the end-of-message status bit set.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest value the 16-bit header length field can carry.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Default negotiated packet size.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Legacy (pre-7.0) login.
    LegacyLogin = 0x02,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular result, sent by the server only.
    TabularResult = 0x04,
    /// Attention signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Transaction manager request.
    TransactionManager = 0x0E,
    /// Login request.
    Login = 0x10,
    /// Security negotiation message.
    Sspi = 0x11,
    /// Pre-login request or response.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x02 => Ok(Self::LegacyLogin),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x0E => Ok(Self::TransactionManager),
            0x10 => Ok(Self::Login),
            0x11 => Ok(Self::Sspi),
            0x12 => Ok(Self::PreLogin),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// Packet status byte. Only 0 and 1 are legal on this connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// More packets follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
    }
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process ID, always zero from the client.
    pub spid: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_id: u8,
    /// Window, always zero.
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header from bytes.
    ///
    /// Unknown packet types and any status other than 0 or 1 are rejected.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePacket {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet ID (sequence number).
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

/// One wire packet: header plus its slice of the message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload bytes following the header.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet from a header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Total encoded size including the header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }

    /// Write header and payload to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        self.header.encode(dst);
        dst.put_slice(&self.payload);
    }
}

/// A logical request or response payload, possibly spanning many packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type stamped on every packet.
    pub packet_type: PacketType,
    /// Complete payload.
    pub payload: Bytes,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Number of packets `frame` produces for a payload of `len` bytes.
#[must_use]
pub fn packet_count(len: usize, max_packet_size: usize) -> usize {
    let chunk = max_packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    len.div_ceil(chunk).max(1)
}

/// Split a message into packets of at most `max_packet_size` bytes.
///
/// Sequence ids start at `start_sequence` and increase by one per packet,
/// wrapping modulo 256. The caller owns the counter and advances it by the
/// number of packets returned. An empty message still yields one packet.
pub fn frame(
    message: &Message,
    max_packet_size: usize,
    start_sequence: u8,
) -> Result<Vec<Packet>, ProtocolError> {
    if max_packet_size <= PACKET_HEADER_SIZE || max_packet_size > MAX_PACKET_SIZE {
        return Err(ProtocolError::invalid_argument(format!(
            "packet size {max_packet_size} outside {}..={MAX_PACKET_SIZE}",
            PACKET_HEADER_SIZE + 1
        )));
    }

    let chunk = max_packet_size - PACKET_HEADER_SIZE;
    let count = packet_count(message.payload.len(), max_packet_size);
    let mut packets = Vec::with_capacity(count);
    let mut sequence = start_sequence;

    for index in 0..count {
        let start = index * chunk;
        let end = (start + chunk).min(message.payload.len());
        let payload = message.payload.slice(start..end);
        let status = if index + 1 == count {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let length = (PACKET_HEADER_SIZE + payload.len()) as u16;
        let header = PacketHeader::new(message.packet_type, status, length).with_packet_id(sequence);
        packets.push(Packet::new(header, payload));
        sequence = sequence.wrapping_add(1);
    }

    Ok(packets)
}

/// Check that an inbound packet belongs to a message of type `expected`.
pub fn check_inbound(packet: &Packet, expected: PacketType) -> Result<(), ProtocolError> {
    if packet.header.packet_type != expected {
        return Err(ProtocolError::UnexpectedPacketType {
            expected: expected as u8,
            actual: packet.header.packet_type as u8,
        });
    }
    Ok(())
}

/// Reassemble the payload of one message from its packets, in arrival order.
///
/// Every packet must carry `expected` as its type and the last packet, and
/// only the last, must be marked end-of-message.
pub fn defragment(packets: &[Packet], expected: PacketType) -> Result<Bytes, ProtocolError> {
    let Some(last) = packets.last() else {
        return Err(ProtocolError::UnexpectedEof);
    };
    if !last.is_end_of_message() {
        return Err(ProtocolError::UnexpectedEof);
    }

    let total = packets.iter().map(|p| p.payload.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for (index, packet) in packets.iter().enumerate() {
        check_inbound(packet, expected)?;
        if packet.is_end_of_message() && index + 1 != packets.len() {
            return Err(ProtocolError::TrailingPackets);
        }
        buf.extend_from_slice(&packet.payload);
    }

    Ok(buf.freeze())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::SqlBatch,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            spid: 0,
            packet_id: 1,
            window: 0,
        };

        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);

        let mut cursor = bytes.as_ref();
        let decoded = PacketHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_is_big_endian() {
        let header = PacketHeader::new(PacketType::PreLogin, PacketStatus::END_OF_MESSAGE, 0x012C)
            .with_packet_id(7);
        assert_eq!(
            &header.encode_to_bytes()[..],
            &[0x12, 0x01, 0x01, 0x2C, 0x00, 0x00, 0x07, 0x00]
        );
    }

    #[test]
    fn test_status_other_than_zero_or_one_rejected() {
        for status in [0x02u8, 0x08, 0x10, 0xFF] {
            let raw = [0x04, status, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00];
            let err = PacketHeader::decode(&mut &raw[..]).unwrap_err();
            assert_eq!(err, ProtocolError::InvalidPacketStatus(status));
        }
    }

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(0x01).unwrap(), PacketType::SqlBatch);
        assert_eq!(PacketType::from_u8(0x0E).unwrap(), PacketType::TransactionManager);
        assert_eq!(PacketType::from_u8(0x12).unwrap(), PacketType::PreLogin);
        assert!(PacketType::from_u8(0x05).is_err());
        assert!(PacketType::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_empty_message_is_one_packet() {
        let message = Message::new(PacketType::SqlBatch, Bytes::new());
        let packets = frame(&message, 512, 1).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
        assert_eq!(packets[0].header.length, 8);
        assert_eq!(packets[0].header.packet_id, 1);
    }

    #[test]
    fn test_frame_marks_only_last_packet() {
        let message = Message::new(PacketType::Login, vec![0xAB; 25]);
        let packets = frame(&message, 18, 1).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(!packets[0].is_end_of_message());
        assert!(!packets[1].is_end_of_message());
        assert!(packets[2].is_end_of_message());
        assert_eq!(packets[2].payload.len(), 5);
        assert!(packets.iter().all(|p| p.header.packet_type == PacketType::Login));
        assert!(packets.iter().all(|p| p.header.length as usize == p.total_size()));
    }

    #[test]
    fn test_sequence_wraps() {
        let message = Message::new(PacketType::SqlBatch, vec![0u8; 30]);
        let packets = frame(&message, 18, 254).unwrap();
        let ids: Vec<u8> = packets.iter().map(|p| p.header.packet_id).collect();
        assert_eq!(ids, vec![254, 255, 0]);
    }

    #[test]
    fn test_frame_rejects_tiny_packet_size() {
        let message = Message::new(PacketType::SqlBatch, vec![0u8; 4]);
        assert!(frame(&message, 8, 1).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_defragment_rejects_wrong_type() {
        let message = Message::new(PacketType::SqlBatch, vec![1, 2, 3]);
        let packets = frame(&message, 512, 1).unwrap();
        let err = defragment(&packets, PacketType::TabularResult).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedPacketType {
                expected: 0x04,
                actual: 0x01
            }
        );
    }

    #[test]
    fn test_defragment_requires_end_of_message() {
        let message = Message::new(PacketType::TabularResult, vec![0u8; 30]);
        let packets = frame(&message, 18, 1).unwrap();
        let err = defragment(&packets[..2], PacketType::TabularResult).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedEof);
    }

    #[test]
    fn test_defragment_rejects_packets_after_end_of_message() {
        let message = Message::new(PacketType::TabularResult, vec![0u8; 30]);
        let mut packets = frame(&message, 18, 1).unwrap();
        packets.insert(1, packets[2].clone());

        let err = defragment(&packets, PacketType::TabularResult).unwrap_err();
        assert_eq!(err, ProtocolError::TrailingPackets);
        assert!(!err.is_invalid_argument());
    }

    proptest! {
        #[test]
        fn prop_frame_defragment_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            packet_size in 9usize..600,
            start in any::<u8>(),
        ) {
            let message = Message::new(PacketType::TabularResult, payload.clone());
            let packets = frame(&message, packet_size, start).unwrap();

            let expected = payload.len().div_ceil(packet_size - PACKET_HEADER_SIZE).max(1);
            prop_assert_eq!(packets.len(), expected);
            prop_assert!(packets.iter().all(|p| p.total_size() <= packet_size));

            let restored = defragment(&packets, PacketType::TabularResult).unwrap();
            prop_assert_eq!(&restored[..], &payload[..]);
        }
    }
}
