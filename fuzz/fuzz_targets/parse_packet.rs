#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_protocol::PacketHeader;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    if let Ok(header) = PacketHeader::decode(&mut cursor) {
        let _ = header.payload_length();
        let _ = header.is_end_of_message();
    }
});
