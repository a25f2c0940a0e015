//! Single-worker request pipeline.
//!
//! One task owns the transport and the packet sequence counter. Callers hand
//! it `(packet type, payload, reply)` commands over an unbounded channel and
//! await the reply, so exactly one exchange is on the wire at a time and
//! exchanges complete in submission order.
//!
//! The first transport, framing or deadline failure marks the shared state
//! `Error`. The failing exchange receives the real error; everything queued
//! behind it, and everything submitted later, receives [`Error::Unusable`].
//!
//! Closing lets the exchange on the wire finish. Requests still queued, and
//! anything submitted after the close, receive [`Error::ConnectionClosed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tds_codec::{Connection, ReceivedMessage};
use tds_protocol::{Message, Packet, PacketType};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::diagnostics::Direction;
use crate::error::{Error, Result};
use crate::state::{SharedState, StateMachine};

/// The packets of one response, in arrival order, and their joined payload.
#[derive(Debug, Clone)]
pub struct ResponseBuffers {
    packets: Vec<Packet>,
    payload: Bytes,
}

impl ResponseBuffers {
    /// Packets in arrival order.
    #[must_use]
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Number of packets the response spanned.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Payload of all packets, headers stripped.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume and return the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<ReceivedMessage> for ResponseBuffers {
    fn from(message: ReceivedMessage) -> Self {
        Self {
            packets: message.packets,
            payload: message.payload,
        }
    }
}

enum Command {
    Exchange {
        packet_type: PacketType,
        payload: Bytes,
        reply: oneshot::Sender<Result<ResponseBuffers>>,
    },
    SetPacketSize(usize),
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the request worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RequestSerializer {
    tx: mpsc::UnboundedSender<Command>,
    state: SharedState,
    closing: Arc<AtomicBool>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exchange {
                packet_type,
                payload,
                ..
            } => f
                .debug_struct("Exchange")
                .field("packet_type", packet_type)
                .field("len", &payload.len())
                .finish(),
            Self::SetPacketSize(size) => f.debug_tuple("SetPacketSize").field(size).finish(),
            Self::Close { .. } => f.write_str("Close"),
        }
    }
}

impl RequestSerializer {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// `io_timeout` bounds each exchange; `None` waits forever.
    pub fn spawn<T>(
        transport: T,
        state: SharedState,
        packet_size: usize,
        io_timeout: Option<Duration>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            connection: Connection::new(transport).with_packet_size(packet_size),
            rx,
            state: state.clone(),
            closing: Arc::clone(&closing),
            io_timeout,
        };
        tokio::spawn(worker.run());
        Self { tx, state, closing }
    }

    /// Send one request and wait for its complete response.
    pub async fn submit(&self, packet_type: PacketType, payload: Bytes) -> Result<ResponseBuffers> {
        if self.is_closing() {
            return Err(Error::ConnectionClosed);
        }

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Exchange {
                packet_type,
                payload,
                reply,
            })
            .map_err(|_| self.rejection())?;

        response.await.map_err(|_| self.rejection())?
    }

    /// Use a new packet size for requests queued after this call.
    pub fn set_packet_size(&self, packet_size: usize) {
        let _ = self.tx.send(Command::SetPacketSize(packet_size));
    }

    /// Stop taking requests and shut the transport down.
    ///
    /// Returns once the exchange on the wire, if any, has finished and the
    /// transport is shut down. Queued requests fail with
    /// [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Whether the worker has stopped accepting requests.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn rejection(&self) -> Error {
        if self.is_closing() {
            Error::ConnectionClosed
        } else {
            self.state.unusable_error()
        }
    }
}

struct Worker<T>
where
    T: AsyncRead + AsyncWrite,
{
    connection: Connection<T>,
    rx: mpsc::UnboundedReceiver<Command>,
    state: SharedState,
    closing: Arc<AtomicBool>,
    io_timeout: Option<Duration>,
}

impl<T> Worker<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Exchange {
                    packet_type,
                    payload,
                    reply,
                } => {
                    if self.closing.load(Ordering::Acquire)
                        || !self.state.current().state.is_usable()
                    {
                        let _ = reply.send(Err(self.rejection()));
                        continue;
                    }

                    match self.exchange(packet_type, payload).await {
                        Ok(buffers) => {
                            let _ = reply.send(Ok(buffers));
                        }
                        Err(err) => {
                            tracing::error!(
                                error = %err,
                                packet_type = ?packet_type,
                                "exchange failed; connection is unusable"
                            );
                            self.state.fail();
                            let _ = reply.send(Err(err));
                            self.reject_queued();
                            return;
                        }
                    }
                }
                Command::SetPacketSize(size) => {
                    tracing::debug!(packet_size = size, "outbound packet size changed");
                    self.connection.set_packet_size(size);
                }
                Command::Close { reply } => {
                    if let Err(e) = self.connection.shutdown().await {
                        tracing::debug!(error = %e, "error shutting down transport");
                    }
                    self.reject_queued();
                    let _ = reply.send(());
                    return;
                }
            }
        }
        tracing::debug!("request worker stopped: all handles dropped");
    }

    async fn exchange(&mut self, packet_type: PacketType, payload: Bytes) -> Result<ResponseBuffers> {
        match self.io_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.round_trip(packet_type, payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout),
                }
            }
            None => self.round_trip(packet_type, payload).await,
        }
    }

    async fn round_trip(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<ResponseBuffers> {
        let message = Message::new(packet_type, payload);
        let sent = self.connection.send_message(&message).await?;
        let diagnostics = self.state.diagnostics();
        for packet in &sent {
            diagnostics.packet(Direction::Outbound, &packet.header, &packet.payload);
        }
        self.state.transition(StateMachine::request_sent)?;

        let received = self
            .connection
            .read_response(PacketType::TabularResult)
            .await?;
        for packet in &received.packets {
            diagnostics.packet(Direction::Inbound, &packet.header, &packet.payload);
        }
        self.state.transition(StateMachine::response_received)?;

        tracing::trace!(
            packet_type = ?packet_type,
            request_packets = sent.len(),
            response_packets = received.packet_count(),
            response_len = received.payload.len(),
            "exchange complete"
        );
        self.state.transition(StateMachine::exchange_complete)?;

        Ok(received.into())
    }

    fn rejection(&self) -> Error {
        if self.closing.load(Ordering::Acquire) {
            Error::ConnectionClosed
        } else {
            self.state.unusable_error()
        }
    }

    fn reject_queued(&mut self) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Exchange { reply, .. } => {
                    let _ = reply.send(Err(self.rejection()));
                }
                Command::Close { reply } => {
                    let _ = reply.send(());
                }
                Command::SetPacketSize(_) => {}
            }
        }
    }
}
