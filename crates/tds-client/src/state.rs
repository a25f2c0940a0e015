//! Connection lifecycle state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Initial -> PreLogin   (socket established)
//! PreLogin -> Login     (pre-login response accepted)
//! Login -> PostLogin    (login acknowledged)
//! any -> Error          (transport, framing or handshake failure)
//! any -> Disconnected   (explicit close, terminal)
//! ```
//!
//! Each exchange within a state moves through its own sub-state:
//!
//! ```text
//! Ready -> RequestSent -> ParsingResponse -> Ready
//!                    \-> Error
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::diagnostics::DiagnosticsSink;
use crate::error::{Error, Result};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket yet.
    Initial,
    /// Exchanging pre-login messages.
    PreLogin,
    /// Exchanging login messages.
    Login,
    /// Authenticated; queries are permitted.
    PostLogin,
    /// A failure left the connection unusable.
    Error,
    /// Closed by the caller. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether exchanges may still be started in this state.
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::PreLogin | Self::Login | Self::PostLogin)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::PreLogin => "PreLogin",
            Self::Login => "Login",
            Self::PostLogin => "PostLogin",
            Self::Error => "Error",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Progress of the exchange in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    /// No exchange in flight.
    Ready,
    /// Request written, awaiting the response.
    RequestSent,
    /// Response received, being interpreted.
    ParsingResponse,
    /// The exchange failed.
    Error,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "Ready",
            Self::RequestSent => "RequestSent",
            Self::ParsingResponse => "ParsingResponse",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Connection state paired with the exchange sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateSnapshot {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Exchange sub-state.
    pub exchange: ExchangeState,
}

impl StateSnapshot {
    /// Create a snapshot.
    #[must_use]
    pub const fn new(state: ConnectionState, exchange: ExchangeState) -> Self {
        Self { state, exchange }
    }
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state, self.exchange)
    }
}

/// Pure transition rules, no locking and no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMachine {
    current: StateSnapshot,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Start in `Initial/Ready`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: StateSnapshot::new(ConnectionState::Initial, ExchangeState::Ready),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn current(&self) -> StateSnapshot {
        self.current
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            state: self.current,
            operation,
        }
    }

    fn set(&mut self, state: ConnectionState, exchange: ExchangeState) -> StateSnapshot {
        self.current = StateSnapshot::new(state, exchange);
        self.current
    }

    /// `Initial -> PreLogin` once the socket is up.
    pub fn socket_established(&mut self) -> Result<StateSnapshot> {
        match self.current.state {
            ConnectionState::Initial => {
                Ok(self.set(ConnectionState::PreLogin, ExchangeState::Ready))
            }
            _ => Err(self.invalid("socket establishment")),
        }
    }

    /// `Ready -> RequestSent` within a usable state.
    pub fn request_sent(&mut self) -> Result<StateSnapshot> {
        match self.current {
            StateSnapshot {
                state,
                exchange: ExchangeState::Ready,
            } if state.is_usable() => Ok(self.set(state, ExchangeState::RequestSent)),
            _ => Err(self.invalid("send request")),
        }
    }

    /// `RequestSent -> ParsingResponse`.
    pub fn response_received(&mut self) -> Result<StateSnapshot> {
        match self.current {
            StateSnapshot {
                state,
                exchange: ExchangeState::RequestSent,
            } if state.is_usable() => Ok(self.set(state, ExchangeState::ParsingResponse)),
            _ => Err(self.invalid("receive response")),
        }
    }

    /// `ParsingResponse -> Ready`.
    pub fn exchange_complete(&mut self) -> Result<StateSnapshot> {
        match self.current {
            StateSnapshot {
                state,
                exchange: ExchangeState::ParsingResponse,
            } if state.is_usable() => Ok(self.set(state, ExchangeState::Ready)),
            _ => Err(self.invalid("complete exchange")),
        }
    }

    /// `PreLogin -> Login -> PostLogin`, only between exchanges.
    pub fn advance(&mut self) -> Result<StateSnapshot> {
        let next = match self.current {
            StateSnapshot {
                state: ConnectionState::PreLogin,
                exchange: ExchangeState::Ready,
            } => ConnectionState::Login,
            StateSnapshot {
                state: ConnectionState::Login,
                exchange: ExchangeState::Ready,
            } => ConnectionState::PostLogin,
            _ => return Err(self.invalid("advance handshake")),
        };
        Ok(self.set(next, ExchangeState::Ready))
    }

    /// Any state except `Disconnected` moves to `Error`.
    pub fn fail(&mut self) -> StateSnapshot {
        if self.current.state != ConnectionState::Disconnected {
            self.set(ConnectionState::Error, ExchangeState::Error);
        }
        self.current
    }

    /// Any state moves to `Disconnected`.
    pub fn close(&mut self) -> StateSnapshot {
        self.set(ConnectionState::Disconnected, ExchangeState::Ready)
    }

    /// Check that queries may be issued.
    pub fn ensure_query_allowed(&self) -> Result<()> {
        match self.current.state {
            ConnectionState::PostLogin => Ok(()),
            ConnectionState::Error => Err(Error::Unusable),
            ConnectionState::Disconnected => Err(Error::ConnectionClosed),
            _ => Err(self.invalid("query")),
        }
    }
}

/// State machine shared between the client handle and the request worker.
///
/// Every transition is reported to the diagnostics sink.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<StateMachine>>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl SharedState {
    /// Create shared state in `Initial/Ready`.
    pub fn new(diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateMachine::new())),
            diagnostics,
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> StateSnapshot {
        self.inner.lock().current()
    }

    /// Apply a fallible transition and report it.
    pub fn transition(
        &self,
        apply: impl FnOnce(&mut StateMachine) -> Result<StateSnapshot>,
    ) -> Result<StateSnapshot> {
        let (from, to) = {
            let mut machine = self.inner.lock();
            let from = machine.current();
            let to = apply(&mut machine)?;
            (from, to)
        };
        self.report(from, to);
        Ok(to)
    }

    /// Move to `Error` and report it.
    pub fn fail(&self) -> StateSnapshot {
        let (from, to) = {
            let mut machine = self.inner.lock();
            (machine.current(), machine.fail())
        };
        self.report(from, to);
        to
    }

    /// Move to `Disconnected` and report it.
    pub fn close(&self) -> StateSnapshot {
        let (from, to) = {
            let mut machine = self.inner.lock();
            (machine.current(), machine.close())
        };
        self.report(from, to);
        to
    }

    /// Check that queries may be issued.
    pub fn ensure_query_allowed(&self) -> Result<()> {
        self.inner.lock().ensure_query_allowed()
    }

    /// Error to hand to work that can no longer run.
    #[must_use]
    pub fn unusable_error(&self) -> Error {
        match self.current().state {
            ConnectionState::Disconnected => Error::ConnectionClosed,
            _ => Error::Unusable,
        }
    }

    /// Diagnostics sink events are forwarded to.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.diagnostics
    }

    fn report(&self, from: StateSnapshot, to: StateSnapshot) {
        if from != to {
            self.diagnostics.state_changed(from, to);
        }
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
