//! Split packet streams over an async transport.
//!
//! - `PacketReader<T>` - read-only stream yielding decoded packets
//! - `PacketWriter<T>` - write-only sink for outbound packets
//!
//! `Connection` owns one of each over the two halves of a transport.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, FramedWrite};
use tokio_util::io::poll_read_buf;

use tds_protocol::Packet;

use crate::error::CodecError;
use crate::packet_codec::TdsCodec;

const READ_CHUNK: usize = 8 * 1024;

pin_project! {
    /// A read-only packet stream for receiving TDS packets.
    ///
    /// Once the transport reports end of stream, buffered bytes are handed
    /// to [`Decoder::decode_eof`] so that a short final packet is still
    /// delivered. After that the stream yields `None`.
    pub struct PacketReader<T> {
        #[pin]
        inner: T,
        codec: TdsCodec,
        buffer: BytesMut,
        eof: bool,
    }
}

impl<T> PacketReader<T>
where
    T: AsyncRead,
{
    /// Create a new packet reader over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet reader with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: transport,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        &self.codec
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        &self.buffer
    }

    /// Whether the transport has reported end of stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl<T> Stream for PacketReader<T>
where
    T: AsyncRead,
{
    type Item = Result<Packet, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.eof {
                return Poll::Ready(this.codec.decode_eof(this.buffer).transpose());
            }

            match this.codec.decode(this.buffer) {
                Ok(Some(packet)) => return Poll::Ready(Some(Ok(packet))),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }

            if this.buffer.len() == this.buffer.capacity() {
                this.buffer.reserve(READ_CHUNK);
            }

            let read = match ready!(poll_read_buf(this.inner.as_mut(), cx, this.buffer)) {
                Ok(n) => n,
                Err(e) => return Poll::Ready(Some(Err(CodecError::Io(e)))),
            };
            if read == 0 {
                tracing::trace!(buffered = this.buffer.len(), "transport reached end of stream");
                *this.eof = true;
            }
        }
    }
}

impl<T> std::fmt::Debug for PacketReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("transport", &self.inner)
            .field("buffered", &self.buffer.len())
            .field("eof", &self.eof)
            .finish()
    }
}

pin_project! {
    /// A write-only packet sink for sending TDS packets.
    pub struct PacketWriter<T> {
        #[pin]
        inner: FramedWrite<T, TdsCodec>,
    }
}

impl<T> PacketWriter<T>
where
    T: AsyncWrite,
{
    /// Create a new packet writer over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedWrite::new(transport, TdsCodec::new()),
        }
    }

    /// Create a new packet writer with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            inner: FramedWrite::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        self.inner.encoder()
    }

    /// Consume the writer and return the underlying transport.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> Sink<Packet> for PacketWriter<T>
where
    T: AsyncWrite,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Packet) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for PacketWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tds_protocol::{PacketHeader, PacketStatus, PacketType};

    #[tokio::test]
    async fn test_reader_across_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x04, 0x01, 0x00, 0x0B])
            .read(&[0x00, 0x00, 0x01, 0x00, b'a'])
            .read(&[b'b', b'c'])
            .build();
        let mut reader = PacketReader::new(mock);

        let packet = reader.next().await.unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"abc");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_delivers_truncated_final_packet() {
        let bytes = [
            0x04, 0x01, 0x00, 0x20, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x06, 0x01,
            0x00, 0x16, 0x00, 0x01, 0x04, 0x00, 0x17, 0x00, 0x01, 0xFF, 0x0A, 0x32, 0x09, 0xC4,
        ];
        let mock = tokio_test::io::Builder::new().read(&bytes).build();
        let mut reader = PacketReader::new(mock);

        let packet = reader.next().await.unwrap().unwrap();
        assert!(packet.is_end_of_message());
        assert_eq!(packet.payload.len(), 20);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_surfaces_io_error() {
        let mock = tokio_test::io::Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = PacketReader::new(mock);

        let err = reader.next().await.unwrap().unwrap_err();
        assert!(err.is_io());
    }

    #[tokio::test]
    async fn test_writer_encodes_packets() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x01, 0x01, 0x00, 0x0A, 0x00, 0x00, 0x05, 0x00, b'h', b'i'])
            .build();
        let mut writer = PacketWriter::new(mock);

        let header =
            PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0).with_packet_id(5);
        writer
            .send(Packet::new(header, Bytes::from_static(b"hi")))
            .await
            .unwrap();
    }
}
