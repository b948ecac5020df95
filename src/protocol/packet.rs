//! # Packets
//!
//! The unit of application traffic and the handlers that dispatch it.
//!
//! A [`Packet`] owns the encoding of its own payload: it writes its fields to
//! the output stream on send and reads them back on receive. The runtime only
//! frames packets with their [`Signature`]; it never sees payload lengths.
//!
//! ## Dispatch Modes
//! - **Serial**: one shared instance per protocol. Receives for that packet
//!   kind never overlap, so the instance may keep state between calls.
//! - **Parallel**: a registered sample plus a factory. Each concurrent
//!   dispatcher borrows its own instance from a pool; the sample itself is
//!   only used as a template and never receives traffic.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::TcpClient;
use crate::core::signature::Signature;
use crate::core::stream::{PacketInput, PacketOutput};
use crate::error::Result;
use crate::server::Server;

/// Connection context passed to every packet operation.
#[derive(Clone, Copy)]
pub struct PacketContext<'a> {
    /// The owning server, absent on client-side connections
    pub server: Option<&'a Server>,
    /// The connection the packet travels on
    pub client: &'a Arc<TcpClient>,
}

impl fmt::Debug for PacketContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketContext")
            .field("server", &self.server.is_some())
            .field("peer", &self.client.peer_addr())
            .finish()
    }
}

/// A self-encoding unit of application data.
///
/// `send` must write exactly what `receive` reads. Partial reads leave the
/// stream misaligned and end the connection on the next frame.
#[async_trait]
pub trait Packet: Send + Sync + 'static {
    /// Identifier of this packet kind on the wire.
    fn magic(&self) -> Signature;

    /// Whether the packet may be discarded when the outgoing queue is full.
    fn can_drop(&self) -> bool {
        false
    }

    /// Write the payload.
    async fn send(&self, ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()>;

    /// Read the payload and act on it.
    async fn receive(&mut self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()>;

    /// Read a payload that arrived over UDP.
    ///
    /// Packets queued on `reply` are sent back to the datagram's origin once
    /// this returns. Defaults to [`Packet::receive`].
    async fn receive_udp(
        &mut self,
        ctx: &PacketContext<'_>,
        input: &mut PacketInput<'_>,
        _reply: &mut UdpReply,
    ) -> Result<()> {
        self.receive(ctx, input).await
    }
}

/// Replies collected while handling a datagram.
#[derive(Default)]
pub struct UdpReply {
    packets: Vec<Arc<dyn Packet>>,
}

impl UdpReply {
    /// Queue a reply to the datagram's sender.
    pub fn send<P: Packet>(&mut self, packet: P) {
        self.packets.push(Arc::new(packet));
    }

    /// Queue an already shared reply.
    pub fn send_shared(&mut self, packet: Arc<dyn Packet>) {
        self.packets.push(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.packets.clear();
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, Arc<dyn Packet>> {
        self.packets.drain(..)
    }
}

impl fmt::Debug for UdpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magics: Vec<Signature> = self.packets.iter().map(|p| p.magic()).collect();
        f.debug_struct("UdpReply").field("packets", &magics).finish()
    }
}

type PacketFactory = dyn Fn() -> Box<dyn Packet> + Send + Sync;

/// Template and instance pool for a parallel packet kind.
pub struct ParallelPacket {
    sample: Box<dyn Packet>,
    factory: Box<PacketFactory>,
    idle: Mutex<Vec<Box<dyn Packet>>>,
    created: AtomicUsize,
}

impl ParallelPacket {
    pub(crate) fn new(sample: Box<dyn Packet>, factory: Box<PacketFactory>) -> Self {
        Self {
            sample,
            factory,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// The registered template instance.
    pub fn sample(&self) -> &dyn Packet {
        self.sample.as_ref()
    }

    /// Number of dispatch instances created so far.
    pub fn instances_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn checkout(&self) -> Box<dyn Packet> {
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        pooled.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            (self.factory)()
        })
    }

    fn checkin(&self, instance: Box<dyn Packet>) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(instance);
        }
    }
}

/// Registered receiver for one packet kind.
pub enum PacketHandler {
    Serial(tokio::sync::Mutex<Box<dyn Packet>>, PacketTraits),
    Parallel(ParallelPacket, PacketTraits),
}

/// Properties captured from a packet at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTraits {
    pub magic: Signature,
    pub can_drop: bool,
}

impl PacketTraits {
    fn of(packet: &dyn Packet) -> Self {
        Self {
            magic: packet.magic(),
            can_drop: packet.can_drop(),
        }
    }
}

impl PacketHandler {
    pub(crate) fn serial(packet: Box<dyn Packet>) -> Self {
        let traits = PacketTraits::of(packet.as_ref());
        PacketHandler::Serial(tokio::sync::Mutex::new(packet), traits)
    }

    pub(crate) fn parallel(sample: Box<dyn Packet>, factory: Box<PacketFactory>) -> Self {
        let traits = PacketTraits::of(sample.as_ref());
        PacketHandler::Parallel(ParallelPacket::new(sample, factory), traits)
    }

    fn traits(&self) -> PacketTraits {
        match self {
            PacketHandler::Serial(_, traits) | PacketHandler::Parallel(_, traits) => *traits,
        }
    }

    pub fn magic(&self) -> Signature {
        self.traits().magic
    }

    pub fn can_drop(&self) -> bool {
        self.traits().can_drop
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, PacketHandler::Serial(..))
    }

    /// Dispatch a TCP payload.
    pub async fn receive(&self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        match self {
            PacketHandler::Serial(instance, _) => instance.lock().await.receive(ctx, input).await,
            PacketHandler::Parallel(pool, _) => {
                let mut instance = pool.checkout();
                let result = instance.receive(ctx, input).await;
                pool.checkin(instance);
                result
            }
        }
    }

    /// Dispatch a UDP payload, collecting replies.
    pub async fn receive_udp(
        &self,
        ctx: &PacketContext<'_>,
        input: &mut PacketInput<'_>,
        reply: &mut UdpReply,
    ) -> Result<()> {
        match self {
            PacketHandler::Serial(instance, _) => {
                instance.lock().await.receive_udp(ctx, input, reply).await
            }
            PacketHandler::Parallel(pool, _) => {
                let mut instance = pool.checkout();
                let result = instance.receive_udp(ctx, input, reply).await;
                pool.checkin(instance);
                result
            }
        }
    }
}

impl fmt::Debug for PacketHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_serial() { "serial" } else { "parallel" };
        f.debug_struct("PacketHandler")
            .field("magic", &self.magic())
            .field("can_drop", &self.can_drop())
            .field("mode", &mode)
            .finish()
    }
}
