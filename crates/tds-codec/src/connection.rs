//! Packet-level connection over a split transport.
//!
//! The transport is split into read and write halves. The connection owns
//! the outbound packet sequence counter, which starts at 1 and keeps running
//! across messages, wrapping modulo 256.

use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, Message, Packet, PacketType, frame};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{MessageAssembler, ReceivedMessage};
use crate::packet_codec::TdsCodec;

/// A TDS connection with split I/O.
///
/// # Example
///
/// ```rust,ignore
/// use tds_codec::Connection;
/// use tds_protocol::{Message, PacketType};
/// use tokio::net::TcpStream;
///
/// let stream = TcpStream::connect("localhost:1433").await?;
/// let mut conn = Connection::new(stream);
///
/// conn.send_message(&Message::new(PacketType::SqlBatch, payload)).await?;
/// let response = conn.read_response(PacketType::TabularResult).await?;
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: PacketWriter<WriteHalf<T>>,
    assembler: MessageAssembler,
    /// Sequence id of the next outbound packet.
    sequence: u8,
    /// Packet size used when framing outbound messages.
    packet_size: usize,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport.
    ///
    /// The transport is immediately split into read and write halves.
    pub fn new(transport: T) -> Self {
        Self::with_codecs(transport, TdsCodec::new(), TdsCodec::new())
    }

    /// Create a new connection with custom codecs.
    pub fn with_codecs(transport: T, read_codec: TdsCodec, write_codec: TdsCodec) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::with_codec(read_half, read_codec),
            writer: PacketWriter::with_codec(write_half, write_codec),
            assembler: MessageAssembler::new(),
            sequence: 1,
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }

    /// Set the packet size used to frame outbound messages.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Change the outbound packet size, e.g. after the server negotiated one.
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size;
    }

    /// Outbound packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Sequence id the next outbound packet will carry.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Frame `message`, write every packet and flush.
    ///
    /// Returns the packets as written, for tracing.
    pub async fn send_message(&mut self, message: &Message) -> Result<Vec<Packet>, CodecError>
    where
        T: Unpin,
    {
        let packets = frame(message, self.packet_size, self.sequence)?;
        let count = packets.len();
        let first_id = self.sequence;
        self.sequence = self.sequence.wrapping_add((count % 256) as u8);

        for packet in &packets {
            self.writer.feed(packet.clone()).await?;
        }
        self.writer.flush().await?;

        tracing::trace!(
            packet_type = ?message.packet_type,
            len = message.len(),
            packets = count,
            first_id = first_id,
            "sent message"
        );
        Ok(packets)
    }

    /// Read packets until one carries the end-of-message status.
    ///
    /// Every packet must have type `expected`. End of stream before the
    /// message completes fails with [`CodecError::ConnectionClosed`].
    pub async fn read_response(
        &mut self,
        expected: PacketType,
    ) -> Result<ReceivedMessage, CodecError>
    where
        T: Unpin,
    {
        self.assembler.clear();
        self.assembler.set_expected(Some(expected));
        match self.next_message().await? {
            Some(message) => Ok(message),
            None => Err(CodecError::ConnectionClosed),
        }
    }

    /// Read the next complete message of any type.
    ///
    /// Returns `None` when the peer closed the stream between messages.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError>
    where
        T: Unpin,
    {
        self.assembler.set_expected(None);
        Ok(self
            .next_message()
            .await?
            .and_then(ReceivedMessage::into_message))
    }

    async fn next_message(&mut self) -> Result<Option<ReceivedMessage>, CodecError>
    where
        T: Unpin,
    {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet)? {
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => {
                    self.assembler.clear();
                    return Err(e);
                }
                None => {
                    if self.assembler.has_partial() {
                        self.assembler.clear();
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), CodecError>
    where
        T: Unpin,
    {
        self.writer.close().await
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("sequence", &self.sequence)
            .field("packet_size", &self.packet_size)
            .field("has_partial", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}
