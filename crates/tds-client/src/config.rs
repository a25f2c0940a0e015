//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tds_protocol::{EncryptionLevel, TdsVersion};

use crate::diagnostics::{DiagnosticsSink, TracingDiagnostics};
use crate::error::{Error, Result};

/// Smallest packet size a server accepts.
pub const MIN_PACKET_SIZE: u16 = 512;

/// Largest packet size a server accepts.
pub const MAX_PACKET_SIZE: u16 = 32767;

/// Timeout configuration.
///
/// `io_timeout` bounds one complete exchange on the socket: writing the
/// request and reading the whole response. When it fires the connection is
/// marked unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection (default: 15s).
    pub connect_timeout: Option<Duration>,
    /// Deadline for one request/response exchange (default: 30s).
    pub io_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(15)),
            io_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-exchange deadline.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Disable both deadlines.
    #[must_use]
    pub fn none() -> Self {
        Self {
            connect_timeout: None,
            io_timeout: None,
        }
    }
}

/// Connection configuration.
///
/// Immutable once handed to [`Client::connect`](crate::Client::connect).
/// Build it from [`Config::new()`] with the builder methods; connection
/// strings are not parsed here.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (default: 1433).
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Initial database.
    pub database: Option<String>,
    /// Application name reported at login.
    pub application_name: String,
    /// Client library name reported at login.
    pub library_name: String,
    /// Client workstation name reported at login.
    pub client_hostname: String,
    /// Preferred language.
    pub language: String,
    /// Requested packet size (default: 4096).
    pub packet_size: u16,
    /// Requested protocol version (default: 7.4).
    pub tds_version: TdsVersion,
    /// Encryption capability announced at pre-login.
    pub encryption: EncryptionLevel,
    /// Client identifier, conventionally a MAC address.
    pub client_id: [u8; 6],
    /// Locale id.
    pub lcid: u32,
    /// Client timezone offset in minutes.
    pub timezone: i32,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Where engine events are reported.
    pub diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            username: String::new(),
            password: String::new(),
            database: None,
            application_name: "tds-client".to_string(),
            library_name: "tds-client".to_string(),
            client_hostname: String::new(),
            language: String::new(),
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            encryption: EncryptionLevel::NotSupported,
            client_id: [0; 6],
            lcid: 0x0409,
            timezone: 0,
            timeouts: TimeoutConfig::default(),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client library name.
    #[must_use]
    pub fn library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    /// Set the client workstation name.
    #[must_use]
    pub fn client_hostname(mut self, name: impl Into<String>) -> Self {
        self.client_hostname = name.into();
        self
    }

    /// Set the preferred language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the requested packet size.
    ///
    /// The value is clamped to the range servers accept.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        self
    }

    /// Set the protocol version to request.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set the encryption capability announced at pre-login.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the client identifier.
    #[must_use]
    pub fn client_id(mut self, id: [u8; 6]) -> Self {
        self.client_id = id;
        self
    }

    /// Set the locale id.
    #[must_use]
    pub fn lcid(mut self, lcid: u32) -> Self {
        self.lcid = lcid;
        self
    }

    /// Set the timezone offset in minutes.
    #[must_use]
    pub fn timezone(mut self, minutes: i32) -> Self {
        self.timezone = minutes;
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the per-exchange deadline.
    #[must_use]
    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeouts.io_timeout = timeout;
        self
    }

    /// Set the diagnostics sink.
    #[must_use]
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Check the configuration before connecting.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must not be 0".into()));
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}",
                self.packet_size
            )));
        }
        Ok(())
    }

    /// `host:port` for the TCP connection.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("packet_size", &self.packet_size)
            .field("tds_version", &self.tds_version)
            .field("encryption", &self.encryption)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
