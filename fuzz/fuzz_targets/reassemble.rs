#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{Message, PacketType, defragment, frame};

#[derive(Debug, Arbitrary)]
struct Input {
    payload: Vec<u8>,
    packet_size: u16,
    start_seq: u8,
}

fuzz_target!(|input: Input| {
    let message = Message::new(PacketType::TabularResult, input.payload.clone());
    if let Ok(packets) = frame(&message, usize::from(input.packet_size), input.start_seq) {
        let joined = defragment(&packets, PacketType::TabularResult).expect("framed packets reassemble");
        assert_eq!(&joined[..], &input.payload[..]);
    }
});
