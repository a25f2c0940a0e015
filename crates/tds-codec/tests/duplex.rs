//! Connection tests over an in-memory duplex pipe.

#![allow(clippy::unwrap_used)]

use tds_codec::{CodecError, Connection, TdsCodec};
use tds_protocol::{Message, PacketType};

#[tokio::test]
async fn large_message_crosses_the_pipe_intact() {
    let (client, server) = tokio::io::duplex(1024);
    let mut client = Connection::new(client).with_packet_size(512);
    let mut server = Connection::new(server);

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let message = Message::new(PacketType::SqlBatch, payload.clone());

    let send = tokio::spawn(async move {
        let count = client.send_message(&message).await.unwrap().len();
        (client, count)
    });

    let received = server.read_message().await.unwrap().unwrap();
    let (client, count) = send.await.unwrap();

    assert_eq!(count, 10_000usize.div_ceil(504));
    assert_eq!(received.packet_type, PacketType::SqlBatch);
    assert_eq!(&received.payload[..], &payload[..]);
    assert_eq!(client.sequence(), (1 + count) as u8);
}

#[tokio::test]
async fn response_is_read_packet_by_packet_in_order() {
    let (client, server) = tokio::io::duplex(64);
    let mut client = Connection::new(client);
    let mut server = Connection::new(server).with_packet_size(16);

    let reply = Message::new(PacketType::TabularResult, b"0123456789abcdefghij".to_vec());
    let send = tokio::spawn(async move { server.send_message(&reply).await.unwrap().len() });

    let response = client.read_response(PacketType::TabularResult).await.unwrap();
    assert_eq!(send.await.unwrap(), 3);
    assert_eq!(response.packet_count(), 3);

    let ids: Vec<u8> = response.packets.iter().map(|p| p.header.packet_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(&response.payload[..], b"0123456789abcdefghij");
}

#[tokio::test]
async fn oversized_inbound_packet_is_rejected() {
    let (client, server) = tokio::io::duplex(8192);
    let mut client =
        Connection::with_codecs(client, TdsCodec::new().with_max_packet_size(512), TdsCodec::new());
    let mut server = Connection::new(server).with_packet_size(4096);

    let reply = Message::new(PacketType::TabularResult, vec![0u8; 2000]);
    server.send_message(&reply).await.unwrap();

    let err = client.read_response(PacketType::TabularResult).await.unwrap_err();
    assert!(matches!(err, CodecError::PacketTooLarge { size: 2008, max: 512 }));
}

#[tokio::test]
async fn peer_close_before_response_is_connection_closed() {
    let (client, server) = tokio::io::duplex(64);
    let mut client = Connection::new(client);
    drop(server);

    let err = client.read_response(PacketType::TabularResult).await.unwrap_err();
    assert!(matches!(err, CodecError::ConnectionClosed));
}
