//! Mock server fidelity tests.
//!
//! Drive the mock with the packet-level connection and the protocol
//! encoders directly, without the client engine, so a mock bug cannot be
//! masked by a matching client bug.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use tds_codec::Connection;
use tds_protocol::{
    EncryptionLevel, Login7, Message, PacketType, PreLogin, ResultDecoder, TdsVersion, Value,
    encode_sql_batch,
};
use tds_testing::{MockColumn, MockResponse, MockTdsServer, ScalarValue};
use tokio::net::TcpStream;

async fn connect(server: &MockTdsServer) -> Connection<TcpStream> {
    let stream = TcpStream::connect(server.addr()).await.expect("connect");
    Connection::new(stream)
}

async fn exchange(
    conn: &mut Connection<TcpStream>,
    packet_type: PacketType,
    payload: bytes::Bytes,
) -> bytes::Bytes {
    conn.send_message(&Message::new(packet_type, payload))
        .await
        .unwrap();
    conn.read_response(PacketType::TabularResult)
        .await
        .unwrap()
        .payload
}

async fn handshake(conn: &mut Connection<TcpStream>, user: &str, password: &str) -> bytes::Bytes {
    let prelogin = exchange(conn, PacketType::PreLogin, PreLogin::new().encode().unwrap()).await;
    let answer = PreLogin::decode(prelogin).unwrap();
    assert_eq!(answer.encryption, EncryptionLevel::NotSupported);

    let login = Login7::new()
        .with_sql_auth(user, password)
        .encode()
        .unwrap();
    exchange(conn, PacketType::Login, login).await
}

#[tokio::test]
async fn test_handshake_and_query() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .with_response(
            "SELECT id, name FROM users",
            MockResponse::rows(
                vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
                vec![
                    vec![ScalarValue::Int(1), ScalarValue::String("Alice".into())],
                    vec![ScalarValue::Int(2), ScalarValue::String("Bob".into())],
                ],
            ),
        )
        .build()
        .await
        .expect("server should start");

    let mut conn = connect(&server).await;
    let login = handshake(&mut conn, "sa", "pw").await;

    let decoder = ResultDecoder::new(TdsVersion::V7_4);
    let response = decoder.decode(login).unwrap();
    assert!(!response.has_errors());
    assert_eq!(response.database(), Some("testdb"));
    assert_eq!(response.login_ack.unwrap().prog_name, "FidelityTest");

    let rows = exchange(
        &mut conn,
        PacketType::SqlBatch,
        encode_sql_batch("select id, name from users"),
    )
    .await;
    let response = decoder.decode(rows).unwrap();
    let set = &response.result_sets[0];
    assert_eq!(set.rows.len(), 2);
    assert_eq!(set.rows[1].values[0], Value::Int(2));
    assert_eq!(set.rows[1].values[1], Value::String("Bob".into()));
    assert_eq!(response.rows_affected(), 2);

    assert_eq!(server.batches(), vec!["select id, name from users".to_string()]);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = MockTdsServer::builder()
        .with_credentials("app", "right")
        .build()
        .await
        .unwrap();

    let mut conn = connect(&server).await;
    let login = handshake(&mut conn, "app", "wrong").await;

    let response = ResultDecoder::new(TdsVersion::V7_4).decode(login).unwrap();
    assert_eq!(response.first_error().unwrap().number, 18456);
    assert!(response.login_ack.is_none());
}

#[tokio::test]
async fn test_default_response_and_error() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM nope", MockResponse::error(208, "Invalid object name 'nope'."))
        .with_default_response(MockResponse::affected(3))
        .build()
        .await
        .unwrap();

    let mut conn = connect(&server).await;
    handshake(&mut conn, "sa", "pw").await;
    let decoder = ResultDecoder::new(TdsVersion::V7_4);

    let failed = exchange(&mut conn, PacketType::SqlBatch, encode_sql_batch("SELECT * FROM nope")).await;
    assert_eq!(decoder.decode(failed).unwrap().first_error().unwrap().number, 208);

    let updated = exchange(&mut conn, PacketType::SqlBatch, encode_sql_batch("UPDATE t SET a = 1")).await;
    assert_eq!(decoder.decode(updated).unwrap().rows_affected(), 3);
}
