#![no_main]

use libfuzzer_sys::fuzz_target;
use uniport::Signature;

fuzz_target!(|data: [u8; 4]| {
    let sig = Signature::from_be_bytes(data);
    let shown = sig.to_string();
    if sig.is_printable() {
        assert_eq!(Signature::from_tag(&shown), sig);
    } else {
        assert_eq!(u32::from_str_radix(&shown, 16).ok(), Some(sig.as_u32()));
    }
});
