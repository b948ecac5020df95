//! Property-based tests using proptest
//!
//! These tests validate wire-level invariants across a wide range of randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::executor::block_on;
use proptest::prelude::*;
use tokio::io::AsyncWriteExt;
use uniport::core::stream::{read_string, write_string, FixedBuffer};
use uniport::protocol::{ClientHello, ServerHello};
use uniport::Signature;

const ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789,.-+*/%&()[]{}";

fn printable_tag() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(ALLOWED.chars().collect::<Vec<_>>()), 4)
        .prop_map(|chars| chars.into_iter().collect())
}

// Property: printable signatures display as their tag and parse back
proptest! {
    #[test]
    fn prop_printable_signature_displays_tag(tag in printable_tag()) {
        let sig = Signature::from_tag(&tag);
        prop_assert!(sig.is_printable());
        prop_assert_eq!(sig.to_string(), tag.clone());
        prop_assert_eq!(Signature::from_tag(&sig.to_string()), sig);
        prop_assert_eq!(sig.to_be_bytes(), <[u8; 4]>::try_from(tag.as_bytes()).unwrap());
    }
}

// Property: any u32 renders as 4 tag characters or 8 hex digits
proptest! {
    #[test]
    fn prop_signature_display_shape(value in any::<u32>()) {
        let sig = Signature::from_u32(value);
        let shown = sig.to_string();
        if sig.is_printable() {
            prop_assert_eq!(shown.len(), 4);
        } else {
            prop_assert_eq!(shown.len(), 8);
            prop_assert_eq!(u32::from_str_radix(&shown, 16).unwrap(), value);
        }
    }
}

// Property: tags longer than four bytes keep only the first four
proptest! {
    #[test]
    fn prop_long_tags_truncate(tag in "[A-Z]{4,12}") {
        prop_assert_eq!(Signature::from_tag(&tag), Signature::from_tag(&tag[..4]));
    }
}

// Property: strings survive the length-prefixed encoding
proptest! {
    #[test]
    fn prop_string_roundtrip(text in ".{0,300}") {
        let mut wire = Vec::new();
        block_on(write_string(&mut wire, &text)).unwrap();
        prop_assert_eq!(wire.len(), text.len() + 2);

        let mut input: &[u8] = &wire;
        let decoded = block_on(read_string(&mut input)).unwrap();
        prop_assert_eq!(decoded, text);
        prop_assert!(input.is_empty());
    }
}

// Property: handshake messages decode to what was encoded
proptest! {
    #[test]
    fn prop_handshake_roundtrip(
        random_id in 1u32..,
        server_name in ".{0,40}",
        motd in ".{0,120}",
        name in ".{0,40}",
        uuid in "[0-9a-f-]{0,36}",
    ) {
        let server = ServerHello { random_id, server_name, motd };
        let client = ClientHello { name, uuid };

        let mut wire = Vec::new();
        block_on(server.write_to(&mut wire)).unwrap();
        block_on(client.write_to(&mut wire)).unwrap();

        let mut input: &[u8] = &wire;
        prop_assert_eq!(block_on(ServerHello::read_from(&mut input)).unwrap(), server);
        prop_assert_eq!(block_on(ClientHello::read_from(&mut input)).unwrap(), client);
        prop_assert!(input.is_empty());
    }
}

// Property: a fixed buffer never holds more than its capacity
proptest! {
    #[test]
    fn prop_fixed_buffer_bounded(
        capacity in 0usize..256,
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
    ) {
        let mut buf = FixedBuffer::new(capacity);
        let mut accepted = 0usize;
        for chunk in &chunks {
            match block_on(buf.write_all(chunk)) {
                Ok(()) => accepted += chunk.len(),
                Err(_) => prop_assert!(buf.overflowed()),
            }
            prop_assert!(buf.len() <= capacity);
        }
        prop_assert_eq!(buf.len(), accepted);
    }
}
