//! Pluggable diagnostics.
//!
//! The engine reports state changes and raw packet traffic to a
//! [`DiagnosticsSink`] supplied through [`Config`](crate::Config). Where the
//! events end up is the sink's business.

use std::fmt;

use tds_protocol::PacketHeader;

use crate::state::StateSnapshot;

/// Direction of a traced packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Outbound,
    /// Server to client.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        })
    }
}

/// Receiver of structured engine events.
///
/// Both callbacks default to doing nothing. They are called from the request
/// worker and must not block.
pub trait DiagnosticsSink: Send + Sync {
    /// The connection moved from one state to another.
    fn state_changed(&self, from: StateSnapshot, to: StateSnapshot) {
        let _ = (from, to);
    }

    /// A packet was written or read.
    fn packet(&self, direction: Direction, header: &PacketHeader, payload: &[u8]) {
        let _ = (direction, header, payload);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl DiagnosticsSink for NoopDiagnostics {}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn state_changed(&self, from: StateSnapshot, to: StateSnapshot) {
        tracing::debug!(from = %from, to = %to, "connection state changed");
    }

    fn packet(&self, direction: Direction, header: &PacketHeader, payload: &[u8]) {
        tracing::trace!(
            direction = %direction,
            packet_type = ?header.packet_type,
            status = header.status.bits(),
            length = header.length,
            packet_id = header.packet_id,
            payload = ?payload,
            "packet"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::{ConnectionState, ExchangeState};
    use parking_lot::Mutex;
    use tds_protocol::{PacketStatus, PacketType};

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(StateSnapshot, StateSnapshot)>>,
    }

    impl DiagnosticsSink for Recorder {
        fn state_changed(&self, from: StateSnapshot, to: StateSnapshot) {
            self.states.lock().push((from, to));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let sink = Recorder::default();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 8);
        sink.packet(Direction::Outbound, &header, &[]);
        assert!(sink.states.lock().is_empty());

        let from = StateSnapshot::new(ConnectionState::Initial, ExchangeState::Ready);
        let to = StateSnapshot::new(ConnectionState::PreLogin, ExchangeState::Ready);
        sink.state_changed(from, to);
        assert_eq!(sink.states.lock().as_slice(), &[(from, to)]);
    }

    #[test]
    fn test_tracing_sink_accepts_events() {
        let header = PacketHeader::new(PacketType::PreLogin, PacketStatus::END_OF_MESSAGE, 10);
        TracingDiagnostics.packet(Direction::Inbound, &header, &[1, 2]);
        NoopDiagnostics.packet(Direction::Inbound, &header, &[1, 2]);
    }
}
