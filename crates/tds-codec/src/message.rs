//! TDS message reassembly.
//!
//! A message is complete when a packet with the `END_OF_MESSAGE` status
//! arrives. Packets are kept in arrival order alongside the concatenated
//! payload so callers can inspect either view.

use bytes::Bytes;
use tds_protocol::packet::{Message, Packet, PacketType, check_inbound, defragment};
use tds_protocol::ProtocolError;

/// A complete message together with the packets that carried it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Packets in arrival order.
    pub packets: Vec<Packet>,
    /// Concatenated payload with headers stripped.
    pub payload: Bytes,
}

impl ReceivedMessage {
    /// Packet type shared by every packet of the message.
    #[must_use]
    pub fn packet_type(&self) -> Option<PacketType> {
        self.packets.first().map(|p| p.header.packet_type)
    }

    /// Number of packets the message spanned.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Convert into a plain [`Message`].
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        let packet_type = self.packet_type()?;
        Some(Message::new(packet_type, self.payload))
    }
}

/// Reassembles inbound packets into complete messages.
///
/// With an expected type set, every packet must carry that type. Without
/// one, the first packet of a message fixes the type for the rest of it.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    /// Type every inbound packet must carry.
    expected: Option<PacketType>,
    /// Packets of the message being assembled.
    packets: Vec<Packet>,
    /// Payload bytes accumulated so far.
    buffered: usize,
}

impl MessageAssembler {
    /// Create an assembler that accepts any message type.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler that only accepts `packet_type`.
    #[must_use]
    pub fn expecting(packet_type: PacketType) -> Self {
        Self {
            expected: Some(packet_type),
            ..Self::default()
        }
    }

    /// Change the expected type for the next message.
    pub fn set_expected(&mut self, packet_type: Option<PacketType>) {
        self.expected = packet_type;
    }

    /// Push a packet into the assembler.
    ///
    /// Returns the complete message when `packet` carries the end-of-message
    /// status. A packet of the wrong type discards the partial message and
    /// fails.
    pub fn push(&mut self, packet: Packet) -> Result<Option<ReceivedMessage>, ProtocolError> {
        let expected = self
            .expected
            .or_else(|| self.packets.first().map(|p| p.header.packet_type))
            .unwrap_or(packet.header.packet_type);

        if let Err(e) = check_inbound(&packet, expected) {
            self.clear();
            return Err(e);
        }

        self.buffered += packet.payload.len();
        let is_eom = packet.is_end_of_message();
        self.packets.push(packet);

        tracing::trace!(
            packet_type = ?expected,
            packet_count = self.packets.len(),
            buffer_len = self.buffered,
            is_eom = is_eom,
            "assembling message"
        );

        if !is_eom {
            return Ok(None);
        }

        let packets = std::mem::take(&mut self.packets);
        self.buffered = 0;
        let payload = defragment(&packets, expected)?;
        Ok(Some(ReceivedMessage { packets, payload }))
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.packets.is_empty()
    }

    /// Get the number of packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Get the number of payload bytes accumulated so far.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffered
    }

    /// Clear any partial message data.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.buffered = 0;
    }
}
