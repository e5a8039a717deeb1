#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tether_net::core::codec::MessageCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes off the wire: decode must error or stall, never panic
    // or allocate past the body limit
    if data.is_empty() {
        return;
    }

    let chunk = usize::from(data[0]).max(1);
    let mut codec = MessageCodec::<u32>::new(64 * 1024);
    let mut buf = BytesMut::new();

    for piece in data[1..].chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(msg)) => assert_eq!(msg.header.size as usize, msg.body.len()),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
