//! # Error Types
//!
//! Error handling for the networking runtime.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`ProtocolError`]. The variants follow the failure classes a connection can
//! run into, from raw socket failures up to misuse of the packet registry.
//!
//! ## Error Categories
//! - **Transport**: socket resets, EOF, closed connections
//! - **Negotiation**: unknown protocol magic, rejected or failed handshakes
//! - **Registry**: sending or receiving a packet kind the protocol never registered
//! - **Backpressure**: a non-droppable packet that could not be queued in time
//! - **Timeouts**: handshake and `ensure_connection` deadlines
//!
//! Transport errors are contained per connection; registry errors are programmer
//! errors and surface immediately to the caller.
//!
//! ## Example Usage
//! ```rust
//! use uniport::error::{ProtocolError, Result};
//! use uniport::Signature;
//!
//! fn require_known(magic: Signature, known: &[Signature]) -> Result<()> {
//!     if known.contains(&magic) {
//!         Ok(())
//!     } else {
//!         Err(ProtocolError::UnregisteredPacket(magic))
//!     }
//! }
//!
//! let ping = Signature::from_tag("PING");
//! assert!(require_known(ping, &[ping]).is_ok());
//! assert!(require_known(Signature::from_tag("NOPE"), &[ping]).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::core::signature::Signature;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_HANDSHAKE_REJECTED: &str = "Handshake rejected by peer logic";
    pub const ERR_HANDSHAKE_ZERO_ID: &str = "Server assigned an invalid random id (0)";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// UDP errors
    pub const ERR_NO_UDP_PORT: &str = "Client has no UDP port to send to";
    pub const ERR_UDP_REPLY_TOO_SHORT: &str = "UDP reply shorter than a packet magic";
}

// ProtocolError is the primary error type for all runtime operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol {0} is unknown")]
    UnknownProtocol(Signature),

    #[error("Received unknown packet {0}")]
    UnknownPacket(Signature),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Packet {0} is not registered on this protocol")]
    UnregisteredPacket(Signature),

    #[error("Packet {0} is already registered on this protocol")]
    DuplicatePacket(Signature),

    #[error("Outgoing queue full: {magic} could not be queued within {waited_ms}ms")]
    QueueOverflow { magic: Signature, waited_ms: u64 },

    #[error("Timeout occurred")]
    Timeout,

    #[error("Datagram too large: {0} bytes")]
    OversizedDatagram(usize),

    #[error("String too long for wire encoding: {0} bytes")]
    StringTooLong(usize),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Server is closed")]
    ServerClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the underlying connection is gone.
    ///
    /// Broadcast and iteration helpers use this to decide whether a client
    /// should be dropped from the registry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::ConnectionClosed | ProtocolError::QueueOverflow { .. }
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
