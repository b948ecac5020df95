//! # Core Wire Components
//!
//! Low-level building blocks shared by every protocol.
//!
//! ## Components
//! - **Signature**: four-character codes identifying protocols and packets
//! - **Stream**: buffered socket halves, datagram buffers, string encoding
//!
//! ## Wire Format
//! ```text
//! TCP connect:  [ProtocolMagic(4)]
//! TCP message:  [PacketMagic(4)] [Payload(N)]
//! UDP request:  [ProtocolMagic(4)] [PacketMagic(4)] [RandomId(4)] [Payload(N)]
//! UDP reply:    [PacketMagic(4)] [Payload(N)]
//! ```
//!
//! All integers are big-endian. Payloads are self-delimiting; only the packet
//! implementation knows their length.

pub mod signature;
pub mod stream;
