#![no_main]

use futures::executor::block_on;
use libfuzzer_sys::fuzz_target;
use uniport::protocol::{ClientHello, ServerHello};

fuzz_target!(|data: &[u8]| {
    // Handshake decoding must reject garbage without panicking
    let mut input = data;
    if let Ok(hello) = block_on(ServerHello::read_from(&mut input)) {
        let mut wire = Vec::new();
        if block_on(hello.write_to(&mut wire)).is_ok() {
            let mut again: &[u8] = &wire;
            assert_eq!(block_on(ServerHello::read_from(&mut again)).ok(), Some(hello));
        }
    }

    let mut input = data;
    let _ = block_on(ClientHello::read_from(&mut input));
});
