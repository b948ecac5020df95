//! # Protocols
//!
//! A [`Protocol`] is a named packet registry plus the logic that drives one
//! connection: handshake, read loop and keepalive.
//!
//! ## Components
//! - **Packet**: self-encoding traffic units and their dispatch handlers
//! - **Handshake**: the post-connect exchange assigning the random id
//! - **Ping**: keepalive registered on every protocol
//!
//! ## Session Loop
//! After the handshake both sides run the same loop: a writer task drains the
//! outgoing queue while the calling task reads `[magic][payload]` frames and
//! dispatches them. When the connection stays silent for the ping delay a
//! [`Ping`] is queued. Any read error, unknown packet or close request ends
//! the session and closes the connection.
//!
//! ```rust
//! use uniport::protocol::{NetworkProtocol, Protocol, PING_MAGIC};
//! use uniport::Signature;
//!
//! let protocol = Protocol::new(Signature::from_tag("CHAT"), NetworkProtocol::Tcp);
//! assert!(protocol.contains(PING_MAGIC));
//! assert_eq!(protocol.magic().to_string(), "CHAT");
//! ```

pub mod handshake;
pub mod packet;
pub mod ping;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

pub use handshake::{ClientHello, DefaultHandshake, Handshake, ServerHello};
pub use packet::{Packet, PacketContext, PacketHandler, PacketTraits, ParallelPacket, UdpReply};
pub use ping::{Ping, PING_MAGIC};

use crate::client::TcpClient;
use crate::core::signature::Signature;
use crate::core::stream::PacketInput;
use crate::error::{ProtocolError, Result};
use crate::server::Server;

/// Transport a protocol is served over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkProtocol {
    Tcp,
    /// Accepted for compatibility; served as plain TCP.
    TcpTls,
    /// TCP session plus UDP datagrams correlated by random id.
    Udp,
}

impl NetworkProtocol {
    pub fn uses_udp(self) -> bool {
        matches!(self, NetworkProtocol::Udp)
    }
}

/// Packet registry and connection driver for one protocol magic.
pub struct Protocol {
    magic: Signature,
    transport: NetworkProtocol,
    packets: HashMap<Signature, PacketHandler>,
    handshake: Box<dyn Handshake>,
}

impl Protocol {
    /// Create a protocol with the default handshake and [`Ping`] registered.
    pub fn new(magic: Signature, transport: NetworkProtocol) -> Self {
        let mut packets = HashMap::new();
        packets.insert(PING_MAGIC, PacketHandler::serial(Box::new(Ping::new())));
        Self {
            magic,
            transport,
            packets,
            handshake: Box::new(DefaultHandshake),
        }
    }

    /// Replace the handshake logic.
    pub fn with_handshake<H: Handshake>(mut self, handshake: H) -> Self {
        self.handshake = Box::new(handshake);
        self
    }

    pub fn magic(&self) -> Signature {
        self.magic
    }

    pub fn transport(&self) -> NetworkProtocol {
        self.transport
    }

    /// Register a packet kind whose receives never overlap.
    pub fn register_serial<P: Packet>(&mut self, packet: P) -> Result<()> {
        let magic = packet.magic();
        self.ensure_vacant(magic)?;
        self.packets.insert(magic, PacketHandler::serial(Box::new(packet)));
        Ok(())
    }

    /// Register a packet kind dispatched to per-dispatcher instances.
    ///
    /// The factory is called once up front for the sample and again whenever
    /// a concurrent dispatch finds no idle instance.
    pub fn register_parallel<P, F>(&mut self, factory: F) -> Result<()>
    where
        P: Packet,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let sample = factory();
        let magic = sample.magic();
        self.ensure_vacant(magic)?;
        let factory = Box::new(move || Box::new(factory()) as Box<dyn Packet>);
        self.packets
            .insert(magic, PacketHandler::parallel(Box::new(sample), factory));
        Ok(())
    }

    fn ensure_vacant(&self, magic: Signature) -> Result<()> {
        if self.packets.contains_key(&magic) {
            return Err(ProtocolError::DuplicatePacket(magic));
        }
        Ok(())
    }

    pub fn find(&self, magic: Signature) -> Option<&PacketHandler> {
        self.packets.get(&magic)
    }

    pub fn contains(&self, magic: Signature) -> bool {
        self.packets.contains_key(&magic)
    }

    /// Registered packet magics, in no particular order.
    pub fn packet_magics(&self) -> impl Iterator<Item = Signature> + '_ {
        self.packets.keys().copied()
    }

    pub async fn server_handshake(&self, server: &Server, client: &TcpClient) -> Result<bool> {
        self.handshake.server_handshake(server, client).await
    }

    pub async fn client_handshake(&self, client: &TcpClient) -> Result<bool> {
        self.handshake.client_handshake(client).await
    }

    /// Drive an accepted connection until it closes.
    pub async fn server_run(&self, server: &Server, client: &Arc<TcpClient>) -> Result<()> {
        self.default_run(Some(server), client).await
    }

    /// Drive an outgoing connection until it closes.
    pub async fn client_run(&self, client: &Arc<TcpClient>) -> Result<()> {
        self.default_run(None, client).await
    }

    /// Session loop shared by both sides.
    ///
    /// Spawns the writer task, reads frames until the connection ends, then
    /// closes the client and releases both stream halves.
    #[instrument(skip_all, fields(protocol = %self.magic, peer = %client.peer_addr()), level = "debug")]
    pub async fn default_run(&self, server: Option<&Server>, client: &Arc<TcpClient>) -> Result<()> {
        client.set_running();
        let writer = tokio::spawn(Arc::clone(client).work_packet_tasks());

        let server_stop = server
            .map(|s| s.shutdown_token().clone())
            .unwrap_or_default();
        let result = self.read_loop(server, client, &server_stop).await;

        client.close();
        if let Err(e) = writer.await {
            debug!(error = %e, "Writer task ended abnormally");
        }
        client.release_streams().await;
        debug!(result = ?result.as_ref().err(), "Session ended");
        result
    }

    async fn read_loop(
        &self,
        server: Option<&Server>,
        client: &Arc<TcpClient>,
        server_stop: &CancellationToken,
    ) -> Result<()> {
        let token = client.cancellation_token().clone();
        let ping_delay = client.settings().ping_delay;
        let mut reader = client.lock_reader().await?;
        let ctx = PacketContext { server, client };
        let mut last_activity = Instant::now();

        loop {
            let idle_left = ping_delay.saturating_sub(last_activity.elapsed());
            let ready = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = server_stop.cancelled() => return Ok(()),
                ready = tokio::time::timeout(idle_left, async { reader.fill_buf().await.map(|b| b.is_empty()) }) => ready,
            };

            match ready {
                Err(_) => {
                    trace!("Connection idle, queueing ping");
                    if let Err(e) = client.send_tcp(Arc::new(Ping::new())).await {
                        debug!(error = %e, "Keepalive ping not queued");
                    }
                    last_activity = Instant::now();
                    continue;
                }
                Ok(Ok(true)) => {
                    debug!("Peer closed the connection");
                    return Ok(());
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = server_stop.cancelled() => return Ok(()),
                dispatched = self.dispatch_next(&ctx, &mut *reader) => dispatched?,
            }
            last_activity = Instant::now();
        }
    }

    async fn dispatch_next(&self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        let magic = Signature::from_u32(input.read_u32().await?);
        let Some(handler) = self.find(magic) else {
            ctx.client.record_protocol_error();
            return Err(ProtocolError::UnknownPacket(magic));
        };
        trace!(packet = %magic, "Dispatching packet");
        handler.receive(ctx, input).await?;
        ctx.client.record_packet_received();
        Ok(())
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut magics: Vec<Signature> = self.packet_magics().collect();
        magics.sort();
        f.debug_struct("Protocol")
            .field("magic", &self.magic)
            .field("transport", &self.transport)
            .field("packets", &magics)
            .finish()
    }
}
