//! # uniport
//!
//! Multi-protocol client/server networking runtime over TCP and UDP.
//!
//! A single [`Server`] hosts any number of [`Protocol`]s. Each connection
//! starts by sending a 4-byte protocol magic; the server then runs that
//! protocol's handshake, assigns the session an unguessable random id and
//! drives a read loop that dispatches self-encoding [`Packet`]s. Outgoing
//! traffic goes through a bounded per-connection queue with drop/evict
//! backpressure. UDP datagrams are correlated with their TCP session by random
//! id and source IP.
//!
//! ## Modules
//! - **core**: signatures and stream adapters
//! - **protocol**: packet registry, handshake, session loop
//! - **client**: [`TcpClient`], either end of a TCP connection
//! - **udp**: [`UdpSender`], client-side datagrams
//! - **server**: [`Server`] and its [`ServerHooks`]
//! - **config**, **error**, **utils**: ambient plumbing
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use uniport::config::{ClientConfig, ServerConfig};
//! use uniport::{NetworkProtocol, Protocol, Server, Signature, TcpClient};
//!
//! # async fn run() -> uniport::Result<()> {
//! let protocol = Arc::new(Protocol::new(Signature::from_tag("CHAT"), NetworkProtocol::Tcp));
//!
//! let server = Arc::new(Server::new(ServerConfig::default()));
//! server.register(Arc::clone(&protocol))?;
//! let addr = server.start_tcp(0).await?;
//!
//! let config = ClientConfig {
//!     address: addr.to_string(),
//!     ..ClientConfig::default()
//! };
//! let client = TcpClient::connect(protocol, &config).await?;
//! assert_ne!(client.random_id(), 0);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod udp;
pub mod utils;

pub use crate::client::{ConnectionSettings, ConnectionState, Side, TcpClient};
pub use crate::core::signature::Signature;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{
    Handshake, NetworkProtocol, Packet, PacketContext, Ping, Protocol, UdpReply,
};
pub use crate::server::{DefaultHooks, Server, ServerHooks};
pub use crate::udp::UdpSender;

/// Re-exported so packet implementations need no direct dependency.
pub use async_trait::async_trait;
