#![no_main]

use libfuzzer_sys::fuzz_target;
use swaggersocket::core::codec;

fuzz_target!(|data: &[u8]| {
    // Inbound decoding must never panic, whatever the bytes
    let _ = codec::decode_inbound(data);
    let _ = codec::decode_handshake(data);
    let _ = codec::decode_outbound(data);
});
