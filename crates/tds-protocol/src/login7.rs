//! Login request construction.
//!
//! ## Layout
//!
//! - 36-byte fixed header: total length, protocol version, packet size,
//!   client program version, process id, connection id, four flag bytes,
//!   timezone and locale id.
//! - A table of 14 variable-data entries. Twelve of them are `(offset,
//!   length)` pairs into a trailing blob; the client id (6 bytes) and the
//!   SSPI long length (4 bytes) are written inline in the table.
//! - The blob itself.
//!
//! Offsets are measured from the start of the message and all table fields
//! are little-endian. Text lengths count UTF-16 code units.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{encode_utf16le, utf16_len};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed header that precedes the variable-data table.
pub const LOGIN7_FIXED_SIZE: usize = 36;

/// Size of the fixed header plus the variable-data table.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Largest login message the length field may describe.
pub const LOGIN7_MAX_SIZE: usize = 65535;

/// Option flags 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionFlags1 {
    /// Use big-endian byte order.
    pub byte_order_be: bool,
    /// EBCDIC character set.
    pub char_ebcdic: bool,
    /// Dump/load off.
    pub dump_load_off: bool,
    /// Warn on database change.
    pub use_db_notify: bool,
    /// Fail the login if the initial database cannot be used.
    pub database_fatal: bool,
    /// Warn on language change.
    pub set_lang_warn: bool,
}

impl OptionFlags1 {
    /// Convert to byte. Bits 2-3 (float format) stay zero for IEEE 754.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.byte_order_be {
            flags |= 0x01;
        }
        if self.char_ebcdic {
            flags |= 0x02;
        }
        if self.dump_load_off {
            flags |= 0x10;
        }
        if self.use_db_notify {
            flags |= 0x20;
        }
        if self.database_fatal {
            flags |= 0x40;
        }
        if self.set_lang_warn {
            flags |= 0x80;
        }
        flags
    }
}

/// Option flags 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionFlags2 {
    /// Fail the login if the language cannot be set.
    pub language_fatal: bool,
    /// ODBC client.
    pub odbc: bool,
    /// User type (0 = normal).
    pub user_type: u8,
    /// Integrated security.
    pub integrated_security: bool,
}

impl OptionFlags2 {
    /// Convert to byte.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.language_fatal {
            flags |= 0x01;
        }
        if self.odbc {
            flags |= 0x02;
        }
        flags |= (self.user_type & 0x07) << 4;
        if self.integrated_security {
            flags |= 0x80;
        }
        flags
    }
}

/// Type flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeFlags {
    /// SQL type (0 = default, 1 = T-SQL).
    pub sql_type: u8,
    /// OLE DB client.
    pub oledb: bool,
    /// Read-only application intent.
    pub read_only_intent: bool,
}

impl TypeFlags {
    /// Convert to byte.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = self.sql_type & 0x0F;
        if self.oledb {
            flags |= 0x10;
        }
        if self.read_only_intent {
            flags |= 0x20;
        }
        flags
    }
}

/// Option flags 3, sent only from protocol 7.2 on.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionFlags3 {
    /// The change-password field is populated.
    pub change_password: bool,
    /// Binary XML.
    pub send_yukon_binary_xml: bool,
    /// User instance.
    pub user_instance: bool,
    /// Unknown collation handling.
    pub unknown_collation_handling: bool,
}

impl OptionFlags3 {
    /// Convert to byte.
    #[must_use]
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.change_password {
            flags |= 0x01;
        }
        if self.send_yukon_binary_xml {
            flags |= 0x02;
        }
        if self.user_instance {
            flags |= 0x04;
        }
        if self.unknown_collation_handling {
            flags |= 0x08;
        }
        flags
    }
}

/// One entry of the variable-data table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableField {
    /// Stored in the blob and referenced by `(offset, length)`.
    ///
    /// `length` is what the table records: UTF-16 code units for text,
    /// bytes for binary data.
    Referenced {
        /// Bytes appended to the blob.
        data: Bytes,
        /// Length written to the table.
        length: usize,
    },
    /// Raw bytes written directly into the table.
    Inline(Bytes),
}

impl VariableField {
    /// A text field, stored as UTF-16LE.
    #[must_use]
    pub fn text(value: &str) -> Self {
        Self::Referenced {
            data: encode_utf16le(value),
            length: utf16_len(value),
        }
    }

    /// A password field, stored as obfuscated UTF-16LE.
    #[must_use]
    pub fn password(value: &str) -> Self {
        Self::Referenced {
            data: Bytes::from(obfuscate_password(&encode_utf16le(value))),
            length: utf16_len(value),
        }
    }

    /// A binary field whose table length counts bytes.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let length = data.len();
        Self::Referenced { data, length }
    }

    /// An inline field.
    #[must_use]
    pub fn inline(data: impl Into<Bytes>) -> Self {
        Self::Inline(data.into())
    }

    /// An empty referenced field.
    #[must_use]
    pub fn empty() -> Self {
        Self::Referenced {
            data: Bytes::new(),
            length: 0,
        }
    }

    fn table_size(&self) -> usize {
        match self {
            Self::Referenced { .. } => 4,
            Self::Inline(data) => data.len(),
        }
    }
}

/// Write a variable-data table followed by its blob.
///
/// `table_offset` is the position of the table within the message; blob
/// offsets are computed from it so they are absolute.
pub fn encode_variable_data(
    fields: &[VariableField],
    table_offset: usize,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let table_size: usize = fields.iter().map(VariableField::table_size).sum();
    let mut offset = table_offset + table_size;
    let mut blob = BytesMut::new();

    for field in fields {
        match field {
            VariableField::Referenced { data, length } => {
                let position = u16::try_from(offset).map_err(|_| {
                    ProtocolError::invalid_argument(format!(
                        "variable data offset {offset} exceeds 65535"
                    ))
                })?;
                let length = u16::try_from(*length).map_err(|_| {
                    ProtocolError::invalid_argument(format!(
                        "variable data length {length} exceeds 65535"
                    ))
                })?;
                dst.put_u16_le(position);
                dst.put_u16_le(length);
                blob.put_slice(data);
                offset += data.len();
            }
            VariableField::Inline(data) => dst.put_slice(data),
        }
    }

    dst.put_slice(&blob);
    Ok(())
}

/// Obfuscate password bytes: XOR each byte with `0xA5`, then swap its nibbles.
#[must_use]
pub fn obfuscate_password(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect()
}

/// Reverse [`obfuscate_password`]: swap nibbles, then XOR with `0xA5`.
#[must_use]
pub fn deobfuscate_password(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.rotate_left(4) ^ 0xA5).collect()
}

/// Wrap an identifier in square brackets unless it already is.
///
/// A value that has only an opening or only a closing bracket is rejected.
pub fn ensure_brackets(value: &str) -> Result<String, ProtocolError> {
    let opens = value.starts_with('[');
    let closes = value.len() > usize::from(opens) && value.ends_with(']');

    match (opens, closes) {
        (true, true) => Ok(value.to_string()),
        (false, false) => Ok(format!("[{value}]")),
        _ => Err(ProtocolError::invalid_argument(format!(
            "unbalanced brackets in identifier {value:?}"
        ))),
    }
}

fn bracketed(value: &str) -> Result<String, ProtocolError> {
    if value.is_empty() {
        Ok(String::new())
    } else {
        ensure_brackets(value)
    }
}

/// Login request builder.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// Protocol version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Connection ID.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client locale id.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Login name, bracketed on the wire.
    pub username: String,
    /// Password, obfuscated on the wire.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Preferred language.
    pub language: String,
    /// Initial database, bracketed on the wire.
    pub database: String,
    /// Client id, written inline.
    pub client_id: [u8; 6],
    /// Security negotiation data.
    pub sspi_data: Vec<u8>,
    /// Database file to attach.
    pub attach_db_file: String,
    /// New password, obfuscated on the wire.
    pub new_password: String,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1 {
                use_db_notify: true,
                database_fatal: true,
                ..Default::default()
            },
            option_flags2: OptionFlags2 {
                language_fatal: true,
                odbc: true,
                ..Default::default()
            },
            type_flags: TypeFlags::default(),
            option_flags3: OptionFlags3::default(),
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: String::from("tds-client"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            sspi_data: Vec::new(),
            attach_db_file: String::new(),
            new_password: String::new(),
        }
    }
}

impl Login7 {
    /// Create a login builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.option_flags2.integrated_security = false;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the client library name.
    #[must_use]
    pub fn with_library_name(mut self, library_name: impl Into<String>) -> Self {
        self.library_name = library_name.into();
        self
    }

    /// Set the preferred language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: [u8; 6]) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the locale id.
    #[must_use]
    pub fn with_lcid(mut self, lcid: u32) -> Self {
        self.client_lcid = lcid;
        self
    }

    /// Set the timezone offset in minutes.
    #[must_use]
    pub fn with_timezone(mut self, minutes: i32) -> Self {
        self.client_timezone = minutes;
        self
    }

    /// Request a password change on login.
    #[must_use]
    pub fn with_new_password(mut self, new_password: impl Into<String>) -> Self {
        self.new_password = new_password.into();
        self.option_flags3.change_password = true;
        self
    }

    /// Set the database file to attach.
    #[must_use]
    pub fn with_attach_db_file(mut self, path: impl Into<String>) -> Self {
        self.attach_db_file = path.into();
        self
    }

    /// Enable read-only intent.
    #[must_use]
    pub fn with_read_only_intent(mut self, read_only: bool) -> Self {
        self.type_flags.read_only_intent = read_only;
        self
    }

    /// The 14 variable-data entries in wire order.
    pub fn variable_fields(&self) -> Result<Vec<VariableField>, ProtocolError> {
        Ok(vec![
            VariableField::text(&self.hostname),
            VariableField::text(&bracketed(&self.username)?),
            VariableField::password(&self.password),
            VariableField::text(&self.app_name),
            VariableField::text(&self.server_name),
            VariableField::empty(),
            VariableField::text(&self.library_name),
            VariableField::text(&self.language),
            VariableField::text(&bracketed(&self.database)?),
            VariableField::inline(Bytes::copy_from_slice(&self.client_id)),
            VariableField::binary(self.sspi_data.clone()),
            VariableField::text(&self.attach_db_file),
            VariableField::password(&self.new_password),
            VariableField::inline(Bytes::from_static(&[0, 0, 0, 0])),
        ])
    }

    /// Encode the login message.
    ///
    /// Fails with `InvalidArgument` if an identifier has unbalanced
    /// brackets or the message would exceed 65535 bytes.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(512);

        buf.put_u32_le(0);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);

        buf.put_u8(self.option_flags1.to_byte());
        buf.put_u8(self.option_flags2.to_byte());
        buf.put_u8(self.type_flags.to_byte());
        if self.tds_version.has_wide_fields() {
            buf.put_u8(self.option_flags3.to_byte());
        } else {
            buf.put_u8(0);
        }

        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        encode_variable_data(&self.variable_fields()?, LOGIN7_FIXED_SIZE, &mut buf)?;

        let total = buf.len();
        if total > LOGIN7_MAX_SIZE {
            return Err(ProtocolError::invalid_argument(format!(
                "login message of {total} bytes exceeds {LOGIN7_MAX_SIZE}"
            )));
        }
        buf[..4].copy_from_slice(&(total as u32).to_le_bytes());

        Ok(buf.freeze())
    }
}
