//! Mock TDS server for integration tests.
//!
//! Speaks enough of the protocol to complete a pre-login and SQL login and
//! to answer SQL batches with scripted responses. Every accepted socket is
//! served by its own task.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_testing::mock_server::{MockTdsServer, MockResponse};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockTdsServer::builder()
//!         .with_response("SELECT 1", MockResponse::scalar_int(1))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let addr = server.addr();
//!     // Connect your client to addr...
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tds_codec::{CodecError, Connection};
use tds_protocol::codec::decode_utf16le;
use tds_protocol::login7::LOGIN7_FIXED_SIZE;
use tds_protocol::sql_batch::ALL_HEADERS_LEN;
use tds_protocol::{
    EncryptionLevel, EnvChangeType, Message, PacketType, TdsVersion, deobfuscate_password,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::tokens::{MockColumn, ResponseBuilder, ScalarValue, prelogin_response};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet-level failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The client sent something the mock does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows with columns.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data.
        rows: Vec<Vec<ScalarValue>>,
    },

    /// Return an error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// Return a rows-affected count.
    RowsAffected(u64),

    /// Return a pre-encoded token stream.
    Raw(Bytes),

    /// Compute the response from the SQL text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Single unnamed INT column with one row.
    pub fn scalar_int(value: i32) -> Self {
        Self::rows(vec![MockColumn::int("")], vec![vec![ScalarValue::Int(value)]])
    }

    /// Single unnamed NVARCHAR column with one row.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        let value = value.into();
        let width = value.encode_utf16().count().max(1) as u16;
        Self::rows(
            vec![MockColumn::nvarchar("", width)],
            vec![vec![ScalarValue::String(value)]],
        )
    }

    /// No rows, no count.
    pub fn empty() -> Self {
        Self::Raw(ResponseBuilder::new().done(None).build())
    }

    /// A rows-affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// A severity 16 error.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// A multi-row response.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Respond by calling `handler` with the SQL text.
    pub fn custom(handler: impl Fn(&str) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(handler))
    }

    fn encode(&self, sql: &str) -> Bytes {
        match self {
            Self::Rows { columns, rows } => {
                let mut builder = ResponseBuilder::new().columns(columns);
                for row in rows {
                    builder = builder.row(row);
                }
                builder.done(Some(rows.len() as u64)).build()
            }
            Self::Error {
                number,
                message,
                severity,
            } => ResponseBuilder::new()
                .error(*number, *severity, message)
                .done_error()
                .build(),
            Self::RowsAffected(count) => ResponseBuilder::new().done(Some(*count)).build(),
            Self::Raw(data) => data.clone(),
            Self::Custom(handler) => handler(sql).encode(sql),
        }
    }
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Responses keyed by upper-cased, trimmed SQL text.
    pub responses: HashMap<String, MockResponse>,
    /// Response for SQL with no entry in `responses`.
    pub default_response: Option<MockResponse>,
    /// Program name sent in the login acknowledgement.
    pub server_name: String,
    /// Database announced after login.
    pub database: String,
    /// Expected credentials; `None` accepts any login.
    pub credentials: Option<(String, String)>,
    /// Encryption level answered at pre-login.
    pub encryption: EncryptionLevel,
    /// Packet size announced after login, if any.
    pub packet_size: Option<u16>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: None,
            server_name: "Mock TDS Server".to_string(),
            database: "master".to_string(),
            credentials: None,
            encryption: EncryptionLevel::NotSupported,
            packet_size: None,
        }
    }
}

/// Builder for [`MockTdsServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `response`.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config
            .responses
            .insert(normalize(&sql.into()), response);
        self
    }

    /// Answer unknown SQL with `response`.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Program name reported in the login acknowledgement.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Database announced after login.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Reject logins that do not present these credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((user.into(), password.into()));
        self
    }

    /// Encryption level to answer at pre-login.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    /// Announce a packet size change after login.
    #[must_use]
    pub fn with_packet_size(mut self, size: u16) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Bind and start serving.
    pub async fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config).await
    }
}

/// A running mock server. Stops when dropped.
#[derive(Debug)]
pub struct MockTdsServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    connection_count: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<String>>>,
}

impl MockTdsServer {
    /// Create a builder.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = Arc::new(config);
        let connection_count = Arc::new(AtomicUsize::new(0));
        let batches = Arc::new(Mutex::new(Vec::new()));

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            connection_count: connection_count.clone(),
            batches: batches.clone(),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let session = Session {
                                    config: config.clone(),
                                    batches: batches.clone(),
                                };
                                let count = connection_count.clone();
                                tokio::spawn(async move {
                                    count.fetch_add(1, Ordering::SeqCst);
                                    if let Err(e) = session.serve(stream).await {
                                        tracing::debug!(peer = %peer, error = %e, "mock connection ended with error");
                                    }
                                    count.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "mock server accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for client configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// SQL batches received so far, across all connections, in arrival order.
    pub fn batches(&self) -> Vec<String> {
        self.batches.lock().clone()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fields of a login request the mock checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Requested protocol version.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Login name, brackets removed.
    pub username: String,
    /// Password, deobfuscated.
    pub password: String,
    /// Initial database, brackets removed.
    pub database: String,
}

impl LoginRequest {
    /// Parse the fields the mock needs from a login payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < LOGIN7_FIXED_SIZE + 36 {
            return Err(MockServerError::Protocol(format!(
                "login payload of {} bytes is too short",
                payload.len()
            )));
        }

        let mut fixed = &payload[4..12];
        let tds_version = TdsVersion::new(fixed.get_u32_le());
        let packet_size = fixed.get_u32_le();

        // Offset table: hostname, username, password, ..., database at index 8.
        let username = read_field(payload, 1)?;
        let password = read_password(payload, 2)?;
        let database = read_field(payload, 8)?;

        Ok(Self {
            tds_version,
            packet_size,
            username: strip_brackets(&username),
            password,
            database: strip_brackets(&database),
        })
    }
}

fn field_bytes(payload: &[u8], index: usize) -> Result<&[u8]> {
    let entry = LOGIN7_FIXED_SIZE + index * 4;
    let offset = u16::from_le_bytes([payload[entry], payload[entry + 1]]) as usize;
    let chars = u16::from_le_bytes([payload[entry + 2], payload[entry + 3]]) as usize;
    payload
        .get(offset..offset + chars * 2)
        .ok_or_else(|| MockServerError::Protocol(format!("login field {index} out of bounds")))
}

fn read_field(payload: &[u8], index: usize) -> Result<String> {
    decode_utf16le(field_bytes(payload, index)?)
        .map_err(|e| MockServerError::Protocol(e.to_string()))
}

fn read_password(payload: &[u8], index: usize) -> Result<String> {
    let clear = deobfuscate_password(field_bytes(payload, index)?);
    decode_utf16le(&clear).map_err(|e| MockServerError::Protocol(e.to_string()))
}

fn strip_brackets(value: &str) -> String {
    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value)
        .to_string()
}

fn normalize(sql: &str) -> String {
    sql.trim().to_uppercase()
}

/// Decode the SQL text of a batch payload, skipping its ALL_HEADERS block.
pub fn decode_sql_batch(payload: &[u8]) -> Result<String> {
    let headers = match payload.get(..4) {
        Some(len) => u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize,
        None => 0,
    };
    let text = if headers == ALL_HEADERS_LEN && payload.len() >= headers {
        &payload[headers..]
    } else {
        payload
    };
    decode_utf16le(text).map_err(|e| MockServerError::Protocol(e.to_string()))
}

struct Session {
    config: Arc<MockServerConfig>,
    batches: Arc<Mutex<Vec<String>>>,
}

impl Session {
    async fn serve(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut conn = Connection::new(stream);
        let mut logged_in = false;

        while let Some(message) = conn.read_message().await? {
            let reply = match message.packet_type {
                PacketType::PreLogin => prelogin_response(self.config.encryption)
                    .map_err(|e| MockServerError::Protocol(e.to_string()))?,
                PacketType::Login => {
                    let (reply, accepted) = self.login(&message.payload)?;
                    logged_in = accepted;
                    if accepted {
                        if let Some(size) = self.config.packet_size {
                            // The acknowledgement itself still goes out at the old size.
                            conn.send_message(&Message::new(PacketType::TabularResult, reply))
                                .await?;
                            conn.set_packet_size(usize::from(size));
                            continue;
                        }
                    }
                    reply
                }
                PacketType::SqlBatch if logged_in => self.batch(&message.payload)?,
                PacketType::SqlBatch => ResponseBuilder::new()
                    .error(4060, 14, "Batch received before login.")
                    .done_error()
                    .build(),
                other => {
                    tracing::debug!(packet_type = ?other, "mock ignoring message");
                    continue;
                }
            };

            conn.send_message(&Message::new(PacketType::TabularResult, reply))
                .await?;
        }

        Ok(())
    }

    fn login(&self, payload: &Bytes) -> Result<(Bytes, bool)> {
        let request = LoginRequest::parse(payload)?;

        if let Some((user, password)) = &self.config.credentials {
            if &request.username != user || &request.password != password {
                let reply = ResponseBuilder::new()
                    .error(
                        18456,
                        14,
                        &format!("Login failed for user '{}'.", request.username),
                    )
                    .done_error()
                    .build();
                return Ok((reply, false));
            }
        }

        let database = if request.database.is_empty() {
            self.config.database.clone()
        } else {
            request.database
        };
        let mut builder = ResponseBuilder::new().env_change(EnvChangeType::Database, &database, "master");
        if let Some(size) = self.config.packet_size {
            builder = builder.env_change(EnvChangeType::PacketSize, &size.to_string(), "4096");
        }
        let reply = builder
            .info(5701, &format!("Changed database context to '{database}'."))
            .login_ack(&self.config.server_name, TdsVersion::V7_4)
            .done(None)
            .build();
        Ok((reply, true))
    }

    fn batch(&self, payload: &Bytes) -> Result<Bytes> {
        let sql = decode_sql_batch(payload)?;
        self.batches.lock().push(sql.clone());

        let response = self
            .config
            .responses
            .get(&normalize(&sql))
            .or(self.config.default_response.as_ref())
            .cloned()
            .unwrap_or_else(MockResponse::empty);
        Ok(response.encode(&sql))
    }
}
