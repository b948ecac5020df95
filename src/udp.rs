//! # UDP Sender
//!
//! Client-side datagram transport bound to an established TCP session.
//!
//! Each datagram carries the protocol magic, the packet magic and the random
//! id the server assigned during the TCP handshake; the server uses the random
//! id together with the source IP to find the session. A datagram is built in
//! a fixed buffer, so an encoder writing past the largest UDP payload fails
//! with [`ProtocolError::OversizedDatagram`] instead of being truncated.
//!
//! ```text
//! request: [ProtocolMagic(4)] [PacketMagic(4)] [RandomId(4)] [Payload(N)]
//! reply:   [PacketMagic(4)] [Payload(N)]
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, instrument, trace};

use crate::client::TcpClient;
use crate::core::signature::Signature;
use crate::core::stream::{FixedBuffer, MAX_DATAGRAM_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{Packet, PacketContext, Protocol, UdpReply};

/// Sends packets of one protocol over UDP on behalf of one TCP session.
#[derive(Debug, Clone)]
pub struct UdpSender {
    protocol: Arc<Protocol>,
    client: Arc<TcpClient>,
}

impl UdpSender {
    pub fn new(protocol: Arc<Protocol>, client: Arc<TcpClient>) -> Self {
        Self { protocol, client }
    }

    /// Sender for the protocol the client's TCP session speaks.
    pub fn for_client(client: Arc<TcpClient>) -> Self {
        Self::new(Arc::clone(client.protocol()), client)
    }

    /// Server endpoint: the TCP peer's IP at the client's configured UDP port.
    pub fn target(&self) -> Result<SocketAddr> {
        let port = self
            .client
            .udp_port()
            .ok_or_else(|| ProtocolError::ConfigError(constants::ERR_NO_UDP_PORT.to_string()))?;
        Ok(SocketAddr::new(self.client.peer_addr().ip(), port))
    }

    async fn bind_for(target: SocketAddr) -> Result<UdpSocket> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Ok(UdpSocket::bind(local).await?)
    }

    fn context(&self) -> PacketContext<'_> {
        PacketContext {
            server: None,
            client: &self.client,
        }
    }

    async fn encode_request(&self, buf: &mut FixedBuffer, packet: &dyn Packet) -> Result<()> {
        buf.reset();
        buf.write_u32(self.protocol.magic().as_u32()).await?;
        buf.write_u32(packet.magic().as_u32()).await?;
        buf.write_u32(self.client.random_id()).await?;
        let ctx = self.context();
        packet.send(&ctx, buf).await.map_err(|e| buf.classify(e))
    }

    fn ensure_registered(&self, packet: &dyn Packet) -> Result<()> {
        let magic = packet.magic();
        if self.protocol.contains(magic) {
            Ok(())
        } else {
            Err(ProtocolError::UnregisteredPacket(magic))
        }
    }

    /// Send one datagram.
    #[instrument(skip_all, fields(packet = %packet.magic()), level = "debug")]
    pub async fn send(&self, packet: &dyn Packet) -> Result<()> {
        self.ensure_registered(packet)?;
        let target = self.target()?;
        let socket = Self::bind_for(target).await?;
        let mut buf = FixedBuffer::datagram();
        self.encode_request(&mut buf, packet).await?;
        socket.send_to(buf.as_slice(), target).await?;
        trace!(%target, bytes = buf.len(), "Datagram sent");
        Ok(())
    }

    /// Send one datagram and handle the single reply.
    ///
    /// The reply is dispatched through the protocol's UDP receive path; any
    /// packets the handler queues are sent back to the replying endpoint with
    /// the full request header. `on_receive` is called with the reply's magic
    /// after it was handled.
    #[instrument(skip_all, fields(packet = %packet.magic()), level = "debug")]
    pub async fn send_with_reply<F>(&self, packet: &dyn Packet, on_receive: F) -> Result<()>
    where
        F: FnOnce(Signature) + Send,
    {
        self.ensure_registered(packet)?;
        let target = self.target()?;
        let socket = Self::bind_for(target).await?;
        let mut buf = FixedBuffer::datagram();
        self.encode_request(&mut buf, packet).await?;
        socket.send_to(buf.as_slice(), target).await?;

        let mut inbound = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = socket.recv_from(&mut inbound).await?;
        if len < 4 {
            return Err(ProtocolError::Custom(
                constants::ERR_UDP_REPLY_TOO_SHORT.to_string(),
            ));
        }

        let magic = Signature::from_be_bytes([inbound[0], inbound[1], inbound[2], inbound[3]]);
        let handler = self
            .protocol
            .find(magic)
            .ok_or(ProtocolError::UnknownPacket(magic))?;

        let ctx = self.context();
        let mut reply = UdpReply::default();
        let mut payload: &[u8] = &inbound[4..len];
        handler.receive_udp(&ctx, &mut payload, &mut reply).await?;
        debug!(reply = %magic, %from, "UDP reply handled");

        for response in reply.drain() {
            self.encode_request(&mut buf, response.as_ref()).await?;
            socket.send_to(buf.as_slice(), from).await?;
        }

        on_receive(magic);
        Ok(())
    }
}
