#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tds_protocol::{ResultDecoder, TdsVersion, TokenParser, decode_tokens};

fuzz_target!(|data: &[u8]| {
    let _ = decode_tokens(data);

    let mut parser = TokenParser::new(Bytes::copy_from_slice(data), TdsVersion::V7_4);
    while let Ok(Some(_)) = parser.next_token() {}

    let _ = ResultDecoder::new(TdsVersion::V7_4).decode(Bytes::copy_from_slice(data));
});
