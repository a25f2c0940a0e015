#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::PreLogin;

fuzz_target!(|data: &[u8]| {
    // Server-controlled bytes: offsets and lengths may point anywhere.
    let _ = PreLogin::decode(Bytes::copy_from_slice(data));
});
