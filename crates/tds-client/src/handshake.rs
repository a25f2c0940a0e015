//! Pre-login and login exchanges.
//!
//! Both run through the request worker like any other exchange. A failure
//! of either step, including a server error token, moves the connection to
//! `Error`; the caller is expected to drop it.

use bytes::Bytes;
use tds_protocol::{
    EncryptionLevel, Login7, PacketType, PreLogin, ProtocolError, Response, ResultDecoder,
    TdsVersion, TokenType,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::serializer::{RequestSerializer, ResponseBuffers};
use crate::state::{SharedState, StateMachine};

/// What the server told us during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Protocol version used to decode responses.
    pub tds_version: TdsVersion,
    /// Server program name from the login acknowledgement.
    pub server_name: Option<String>,
    /// Server program version from the login acknowledgement.
    pub server_version: Option<u32>,
    /// Current database.
    pub database: Option<String>,
    /// Negotiated packet size.
    pub packet_size: usize,
    /// Encryption level the server answered at pre-login.
    pub encryption: EncryptionLevel,
}

/// Build the pre-login request for `config`.
#[must_use]
pub fn build_prelogin(config: &Config) -> PreLogin {
    PreLogin::new()
        .with_encryption(config.encryption)
        .with_mars(false)
}

/// Build the login request for `config`.
#[must_use]
pub fn build_login(config: &Config) -> Login7 {
    let mut login = Login7::new()
        .with_tds_version(config.tds_version)
        .with_packet_size(u32::from(config.packet_size))
        .with_sql_auth(&config.username, &config.password)
        .with_hostname(&config.client_hostname)
        .with_app_name(&config.application_name)
        .with_server_name(&config.host)
        .with_library_name(&config.library_name)
        .with_language(&config.language)
        .with_client_id(config.client_id)
        .with_lcid(config.lcid)
        .with_timezone(config.timezone);

    if let Some(ref database) = config.database {
        login = login.with_database(database);
    }
    login
}

/// Handshake responses must arrive in exactly one packet.
fn ensure_single_packet(buffers: &ResponseBuffers, context: &'static str) -> Result<()> {
    match buffers.packet_count() {
        1 => Ok(()),
        packets => Err(Error::Protocol(ProtocolError::FragmentedResponse {
            context,
            packets,
        })),
    }
}

/// Validate a pre-login response and decode its options.
///
/// The response must arrive in exactly one packet and must not start with
/// an ERROR token.
pub fn parse_prelogin_response(buffers: &ResponseBuffers, version: TdsVersion) -> Result<PreLogin> {
    ensure_single_packet(buffers, "pre-login")?;

    let payload = buffers.payload();
    if payload.first() == Some(&(TokenType::Error as u8)) {
        return Err(server_error(payload.clone(), version));
    }

    Ok(PreLogin::decode(payload.clone())?)
}

/// Run the pre-login exchange and move `PreLogin -> Login`.
pub async fn prelogin(
    serializer: &RequestSerializer,
    state: &SharedState,
    config: &Config,
) -> Result<PreLogin> {
    let request = build_prelogin(config);
    tracing::debug!(encryption = ?request.encryption, "sending pre-login");

    let buffers = serializer
        .submit(PacketType::PreLogin, request.encode()?)
        .await?;
    let response = parse_prelogin_response(&buffers, config.tds_version)?;

    tracing::debug!(
        server_version = ?response.version,
        encryption = ?response.encryption,
        mars = response.mars,
        "pre-login response received"
    );

    if response.encryption.is_required() {
        return Err(Error::UnsupportedFeature(format!(
            "server requires encryption ({:?}) and transport security is not available",
            response.encryption
        )));
    }

    state.transition(StateMachine::advance)?;
    Ok(response)
}

/// Validate a login response and decode its tokens.
///
/// Like the pre-login response, it must arrive in exactly one packet.
pub fn parse_login_response(buffers: ResponseBuffers, version: TdsVersion) -> Result<Response> {
    ensure_single_packet(&buffers, "login")?;
    Ok(ResultDecoder::new(version).decode(buffers.into_payload())?)
}

/// Run the login exchange and move `Login -> PostLogin`.
pub async fn login(
    serializer: &RequestSerializer,
    state: &SharedState,
    config: &Config,
    encryption: EncryptionLevel,
) -> Result<Session> {
    let payload = build_login(config).encode()?;
    tracing::debug!(
        len = payload.len(),
        username = %config.username,
        database = ?config.database,
        "sending login"
    );

    let buffers = serializer.submit(PacketType::Login, payload).await?;
    let response = parse_login_response(buffers, config.tds_version)?;

    if let Some(err) = response.first_error() {
        tracing::error!(
            number = err.number,
            class = err.class,
            message = %err.message,
            "login rejected"
        );
        return Err(Error::Server(err.clone()));
    }

    let mut session = Session {
        tds_version: config.tds_version,
        server_name: None,
        server_version: None,
        database: response.database().map(str::to_string),
        packet_size: usize::from(config.packet_size),
        encryption,
    };

    if let Some(size) = response.packet_size() {
        tracing::debug!(packet_size = size, "server changed packet size");
        session.packet_size = size as usize;
    }

    match response.login_ack {
        Some(ref ack) => {
            tracing::info!(
                tds_version = %ack.tds_version(),
                prog_name = %ack.prog_name,
                prog_version = ack.prog_version,
                "login acknowledged"
            );
            session.tds_version = ack.tds_version();
            session.server_name = Some(ack.prog_name.clone());
            session.server_version = Some(ack.prog_version);
        }
        None => tracing::warn!("login response carried no acknowledgement"),
    }

    for info in &response.infos {
        tracing::debug!(number = info.number, message = %info.message, "server info message");
    }

    state.transition(StateMachine::advance)?;
    Ok(session)
}

fn server_error(payload: Bytes, version: TdsVersion) -> Error {
    match ResultDecoder::new(version).decode(payload) {
        Ok(response) => match response.first_error() {
            Some(err) => Error::Server(err.clone()),
            None => Error::Protocol(ProtocolError::UnexpectedEof),
        },
        Err(e) => e.into(),
    }
}
