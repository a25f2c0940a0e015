//! Client handle.
//!
//! A [`Client`] is a cheap handle onto one connection. Clones share the
//! request worker, so requests issued from several tasks are written to the
//! socket one at a time in the order they were submitted.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tds_protocol::{PacketType, Response, ResultDecoder, encode_sql_batch};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handshake::{self, Session};
use crate::row::{ExecResult, Rows};
use crate::serializer::{RequestSerializer, ResponseBuffers};
use crate::state::{SharedState, StateMachine, StateSnapshot};

/// A connection to the server.
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    state: SharedState,
    serializer: RequestSerializer,
    session: Arc<Mutex<Session>>,
}

impl Client {
    /// Open a TCP connection and run the handshake.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let addr = config.address();
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = ?config.database,
            "connecting"
        );

        let stream = with_deadline(config.timeouts.connect_timeout, TcpStream::connect(&addr))
            .await?
            .map_err(|e| Error::Transport(Arc::new(e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Transport(Arc::new(e)))?;

        tracing::debug!(addr = %addr, "TCP connection established");
        Self::handshake(stream, config).await
    }

    /// Run pre-login and login over an already open transport.
    ///
    /// On failure the connection is left in `Error` and the transport is
    /// shut down.
    pub async fn handshake<T>(transport: T, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let state = SharedState::new(Arc::clone(&config.diagnostics));
        state.transition(StateMachine::socket_established)?;

        let serializer = RequestSerializer::spawn(
            transport,
            state.clone(),
            usize::from(config.packet_size),
            config.timeouts.io_timeout,
        );

        match Self::login_sequence(&serializer, &state, &config).await {
            Ok(session) => {
                if session.packet_size != usize::from(config.packet_size) {
                    serializer.set_packet_size(session.packet_size);
                }
                Ok(Self {
                    config: Arc::new(config),
                    state,
                    serializer,
                    session: Arc::new(Mutex::new(session)),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, state = %state.current(), "handshake failed");
                state.fail();
                serializer.close().await;
                Err(e)
            }
        }
    }

    async fn login_sequence(
        serializer: &RequestSerializer,
        state: &SharedState,
        config: &Config,
    ) -> Result<Session> {
        let prelogin = handshake::prelogin(serializer, state, config).await?;
        handshake::login(serializer, state, config, prelogin.encryption).await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> StateSnapshot {
        self.state.current()
    }

    /// What the handshake negotiated, updated by later environment changes.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Configuration the connection was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send a raw request through the worker and return the response buffers.
    ///
    /// Requires a completed handshake.
    pub async fn submit(&self, packet_type: PacketType, payload: Bytes) -> Result<ResponseBuffers> {
        self.ensure_query_allowed()?;
        self.serializer.submit(packet_type, payload).await
    }

    /// Run a SQL batch and decode the whole response.
    ///
    /// Server errors are returned inside the [`Response`]; they leave the
    /// connection usable.
    pub async fn batch(&self, sql: &str) -> Result<Response> {
        if sql.trim().is_empty() {
            return Err(Error::InvalidArgument("empty SQL batch".into()));
        }

        tracing::debug!(sql_len = sql.len(), "sending SQL batch");
        let buffers = self
            .submit(PacketType::SqlBatch, encode_sql_batch(sql))
            .await?;

        let version = self.session.lock().tds_version;
        let response = match ResultDecoder::new(version).decode(buffers.into_payload()) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "undecodable response; connection is unusable");
                self.state.fail();
                return Err(e.into());
            }
        };

        self.apply_env_changes(&response);
        for info in &response.infos {
            tracing::debug!(number = info.number, message = %info.message, "server info message");
        }
        Ok(response)
    }

    /// Run a statement that returns rows.
    pub async fn query(&self, sql: &str) -> Result<Rows> {
        let response = self.batch(sql).await?;
        check_server_errors(&response)?;
        Ok(Rows::from_response(response))
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&self, sql: &str) -> Result<ExecResult> {
        let response = self.batch(sql).await?;
        check_server_errors(&response)?;
        Ok(ExecResult::from_response(&response))
    }

    /// Close the connection.
    ///
    /// An exchange already on the wire is allowed to finish. Requests still
    /// queued, and anything submitted afterwards, fail with
    /// [`Error::ConnectionClosed`].
    pub async fn close(&self) -> Result<()> {
        tracing::debug!(state = %self.state.current(), "closing connection");
        self.serializer.close().await;
        self.state.close();
        Ok(())
    }

    pub(crate) fn ensure_query_allowed(&self) -> Result<()> {
        if self.serializer.is_closing() {
            return Err(Error::ConnectionClosed);
        }
        self.state.ensure_query_allowed()
    }

    /// Whether the worker has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.serializer.is_closed()
    }

    fn apply_env_changes(&self, response: &Response) {
        if let Some(database) = response.database() {
            tracing::debug!(database = %database, "database changed");
            self.session.lock().database = Some(database.to_string());
        }
        if let Some(size) = response.packet_size() {
            let size = size as usize;
            let mut session = self.session.lock();
            if session.packet_size != size {
                tracing::debug!(packet_size = size, "packet size changed");
                session.packet_size = size;
                self.serializer.set_packet_size(size);
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state.current())
            .finish_non_exhaustive()
    }
}

fn check_server_errors(response: &Response) -> Result<()> {
    match response.first_error() {
        Some(err) => {
            tracing::debug!(
                number = err.number,
                class = err.class,
                message = %err.message,
                "statement failed on the server"
            );
            Err(Error::Server(err.clone()))
        }
        None => Ok(()),
    }
}

async fn with_deadline<F: std::future::Future>(
    deadline: Option<Duration>,
    future: F,
) -> Result<F::Output> {
    match deadline {
        Some(d) => tokio::time::timeout(d, future)
            .await
            .map_err(|_| Error::Timeout),
        None => Ok(future.await),
    }
}
