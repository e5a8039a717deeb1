#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_net::core::message::Message;

fuzz_target!(|data: &[u8]| {
    // Pop mixed widths off an arbitrary body until it runs dry
    let mut msg = Message::with_body(0u32, data.to_vec());
    let mut width_selector = data.iter().copied().cycle();

    while !msg.is_empty() {
        let remaining = msg.body.len();
        match width_selector.next().unwrap_or(0) % 4 {
            0 if remaining >= 8 => {
                msg.pop::<u64>();
            }
            1 if remaining >= 4 => {
                msg.pop::<u32>();
            }
            2 if remaining >= 2 => {
                msg.pop::<u16>();
            }
            _ => {
                msg.pop::<u8>();
            }
        }
        assert_eq!(msg.header.size as usize, msg.body.len());
    }
});
