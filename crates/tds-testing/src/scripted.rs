//! In-memory transport that replays a fixed script.
//!
//! Each complete request written by the client (a packet with the
//! end-of-message status) starts the next [`Step`]. Reads then serve that
//! step until it is exhausted. Once the script runs out, reads report end
//! of stream, as if the server had hung up.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tds_protocol::{PACKET_HEADER_SIZE, PacketStatus};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::tokens::frame_response;

/// What the scripted server does after receiving one request.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send these bytes verbatim, already framed.
    Respond(Bytes),
    /// Send these bytes, then report end of stream.
    Final(Bytes),
    /// Never answer.
    Stall,
    /// Fail the next read with this error kind.
    Fail(io::ErrorKind),
    /// Close the stream.
    Close,
}

impl Step {
    /// Respond with `payload` framed as one tabular-result packet.
    pub fn tabular(payload: Bytes) -> Self {
        Self::Respond(frame_response(payload, tds_protocol::MAX_PACKET_SIZE))
    }

    /// Respond with `payload` framed into packets of at most `packet_size`.
    pub fn tabular_packets(payload: Bytes, packet_size: usize) -> Self {
        Self::Respond(frame_response(payload, packet_size))
    }
}

#[derive(Debug, Default)]
struct Inner {
    steps: VecDeque<Step>,
    active: Option<Step>,
    /// Requests received so far, one entry per complete message.
    requests: Vec<Bytes>,
    /// Bytes of the request currently being written.
    pending: BytesMut,
    /// Bytes of the current message, packet by packet.
    message: BytesMut,
    read_waker: Option<Waker>,
    shutdown: bool,
}

impl Inner {
    /// Split complete packets off `pending`; start the next step on EOM.
    fn absorb_written(&mut self) {
        loop {
            if self.pending.len() < PACKET_HEADER_SIZE {
                return;
            }
            let length = u16::from_be_bytes([self.pending[2], self.pending[3]]) as usize;
            if length < PACKET_HEADER_SIZE || self.pending.len() < length {
                return;
            }

            let packet = self.pending.split_to(length);
            let eom = packet[1] & PacketStatus::END_OF_MESSAGE.bits() != 0;
            self.message.extend_from_slice(&packet);

            if eom {
                let request = self.message.split().freeze();
                self.requests.push(request);
                self.active = Some(self.steps.pop_front().unwrap_or(Step::Close));
                if let Some(waker) = self.read_waker.take() {
                    waker.wake();
                }
            }
        }
    }
}

/// Scripted transport. Clones share the same script and capture.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    /// Create a transport that plays `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                steps: steps.into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    /// Append a step to the script.
    pub fn push(&self, step: Step) {
        self.inner.lock().steps.push_back(step);
    }

    /// Complete requests received so far, headers included.
    pub fn requests(&self) -> Vec<Bytes> {
        self.inner.lock().requests.clone()
    }

    /// Number of complete requests received.
    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Steps not yet started.
    pub fn remaining_steps(&self) -> usize {
        self.inner.lock().steps.len()
    }

    /// Whether the client shut down its write side.
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Replace the step being served, typically a [`Step::Stall`].
    pub fn release(&self, step: Step) {
        let mut inner = self.inner.lock();
        inner.active = Some(step);
        if let Some(waker) = inner.read_waker.take() {
            waker.wake();
        }
    }
}

impl AsyncRead for ScriptedTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.active.as_mut() {
            Some(Step::Respond(data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                data.advance(n);
                if data.is_empty() {
                    inner.active = None;
                }
                Poll::Ready(Ok(()))
            }
            Some(Step::Final(data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                data.advance(n);
                if data.is_empty() {
                    inner.active = Some(Step::Close);
                }
                Poll::Ready(Ok(()))
            }
            Some(Step::Fail(kind)) => {
                let kind = *kind;
                inner.active = None;
                Poll::Ready(Err(io::Error::new(kind, "scripted transport failure")))
            }
            Some(Step::Close) => Poll::Ready(Ok(())),
            Some(Step::Stall) | None => {
                if inner.shutdown {
                    return Poll::Ready(Ok(()));
                }
                inner.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for ScriptedTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        inner.pending.extend_from_slice(buf);
        inner.absorb_written();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        if let Some(waker) = inner.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}
