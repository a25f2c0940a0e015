#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::EnvChange;

fuzz_target!(|data: &[u8]| {
    let mut bytes = Bytes::copy_from_slice(data);
    if let Ok(change) = EnvChange::decode(&mut bytes) {
        let _ = change.new_database();
        let _ = change.new_packet_size();
    }
});
