//! # Signatures
//!
//! Four-character codes used to tag protocols and packet kinds on the wire.
//!
//! A signature is a big-endian `u32` built from up to four ASCII characters.
//! Short tags are zero-padded on the right, longer tags are truncated, so
//! encoding never fails. The printable form is the tag itself when all four
//! bytes are in the allowed character set, otherwise eight lowercase hex digits.
//!
//! ```rust
//! use uniport::Signature;
//!
//! let test = Signature::from_tag("TEST");
//! assert_eq!(test.as_u32(), 0x5445_5354);
//! assert_eq!(test.to_string(), "TEST");
//!
//! // Zero padding makes the printable form fall back to hex
//! assert_eq!(Signature::from_tag("AB").to_string(), "41420000");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// 4-byte big-endian packet/protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature(u32);

impl Signature {
    /// Encode up to four bytes of `tag` into a signature.
    pub const fn from_tag(tag: &str) -> Self {
        let bytes = tag.as_bytes();
        let mut value = 0u32;
        let mut i = 0;
        while i < 4 {
            value <<= 8;
            if i < bytes.len() {
                value |= bytes[i] as u32;
            }
            i += 1;
        }
        Signature(value)
    }

    pub const fn from_u32(value: u32) -> Self {
        Signature(value)
    }

    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Signature(u32::from_be_bytes(bytes))
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Whether the signature renders as its ASCII tag rather than hex.
    pub fn is_printable(self) -> bool {
        self.to_be_bytes().iter().all(|&b| is_allowed(b))
    }
}

#[inline]
fn is_allowed(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b",.-+*/%&()[]{}".contains(&b)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            for b in self.to_be_bytes() {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:08x}", self.0)
        }
    }
}

impl From<u32> for Signature {
    fn from(value: u32) -> Self {
        Signature(value)
    }
}

impl From<Signature> for u32 {
    fn from(sig: Signature) -> Self {
        sig.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_big_endian() {
        assert_eq!(Signature::from_tag("PING").to_be_bytes(), *b"PING");
        assert_eq!(Signature::from_tag("TEST").as_u32(), 0x5445_5354);
    }

    #[test]
    fn pads_and_truncates() {
        assert_eq!(Signature::from_tag("").as_u32(), 0);
        assert_eq!(Signature::from_tag("A").as_u32(), 0x4100_0000);
        assert_eq!(Signature::from_tag("ECHOES"), Signature::from_tag("ECHO"));
    }

    #[test]
    fn printable_or_hex() {
        assert_eq!(Signature::from_tag("a1{}").to_string(), "a1{}");
        assert_eq!(Signature::from_u32(0xdead_beef).to_string(), "deadbeef");
        assert_eq!(Signature::from_u32(1).to_string(), "00000001");
        // space is not in the allowed set
        assert_eq!(Signature::from_tag("A B ").to_string(), "41204220");
    }

    #[test]
    fn const_evaluable() {
        const MAGIC: Signature = Signature::from_tag("CNST");
        assert_eq!(MAGIC.to_string(), "CNST");
    }
}
