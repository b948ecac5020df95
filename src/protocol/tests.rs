// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::client::{ConnectionSettings, TcpClient};
use crate::core::signature::Signature;
use crate::core::stream::{PacketInput, PacketOutput};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{ClientHello, ServerHello};
use crate::protocol::*;

const COUNT: Signature = Signature::from_tag("CNT_");
const SLOW: Signature = Signature::from_tag("SLOW");

/// Counts receives and remembers the last value read.
struct Counter {
    received: Arc<AtomicUsize>,
    last: u32,
}

#[async_trait]
impl Packet for Counter {
    fn magic(&self) -> Signature {
        COUNT
    }

    async fn send(&self, _ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()> {
        out.write_u32(self.last).await?;
        Ok(())
    }

    async fn receive(&mut self, _ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        self.last = input.read_u32().await?;
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sleeps while tracking how many receives overlap; encodes its own receive count.
struct Slow {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    handled: u32,
}

impl Slow {
    fn new(active: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
        Self {
            active: Arc::clone(active),
            peak: Arc::clone(peak),
            handled: 0,
        }
    }
}

#[async_trait]
impl Packet for Slow {
    fn magic(&self) -> Signature {
        SLOW
    }

    async fn send(&self, _ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()> {
        out.write_u32(self.handled).await?;
        Ok(())
    }

    async fn receive(&mut self, _ctx: &PacketContext<'_>, _input: &mut PacketInput<'_>) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.handled += 1;
        Ok(())
    }
}

async fn dispatch_empty(handler: &PacketHandler, ctx: &PacketContext<'_>) -> Result<()> {
    let mut input: &[u8] = &[];
    handler.receive(ctx, &mut input).await
}

async fn loopback_client(protocol: Protocol) -> (Arc<TcpClient>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = TcpClient::accepted(
        accepted.unwrap().0,
        Arc::new(protocol),
        42,
        ConnectionSettings::default(),
    )
    .unwrap();
    (Arc::new(client), peer.unwrap())
}

// =================== Registry ===================

#[test]
fn new_protocol_registers_ping() {
    let protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Udp);
    let ping = protocol.find(PING_MAGIC).expect("ping registered");
    assert!(ping.is_serial());
    assert!(ping.can_drop());
    assert_eq!(protocol.packet_magics().count(), 1);
    assert!(protocol.transport().uses_udp());
}

#[test]
fn duplicate_registration_rejected() {
    let mut protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    let received = Arc::new(AtomicUsize::new(0));
    protocol
        .register_serial(Counter { received: received.clone(), last: 0 })
        .unwrap();

    let err = protocol
        .register_serial(Counter { received: received.clone(), last: 0 })
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DuplicatePacket(m) if m == COUNT));

    let err = protocol
        .register_parallel(move || Counter { received: received.clone(), last: 0 })
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DuplicatePacket(_)));

    assert!(matches!(
        protocol.register_serial(Ping::new()),
        Err(ProtocolError::DuplicatePacket(m)) if m == PING_MAGIC
    ));
}

// =================== Dispatch ===================

#[tokio::test]
async fn serial_dispatch_keeps_state() {
    let received = Arc::new(AtomicUsize::new(0));
    let mut protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    protocol
        .register_serial(Counter { received: received.clone(), last: 0 })
        .unwrap();
    let (client, _peer) = loopback_client(protocol).await;
    let ctx = PacketContext { server: None, client: &client };
    let handler = client.protocol().find(COUNT).unwrap();

    for value in [3u32, 9] {
        let bytes = value.to_be_bytes();
        let mut input: &[u8] = &bytes;
        handler.receive(&ctx, &mut input).await.unwrap();
    }
    assert_eq!(received.load(Ordering::SeqCst), 2);

    // The shared instance encodes the last value it received
    let PacketHandler::Serial(instance, _) = handler else {
        panic!("expected a serial handler");
    };
    let mut out = Vec::new();
    instance.lock().await.send(&ctx, &mut out).await.unwrap();
    assert_eq!(out, 9u32.to_be_bytes());
}

#[tokio::test]
async fn parallel_dispatch_overlaps_on_distinct_instances() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    {
        let (active, peak) = (active.clone(), peak.clone());
        protocol
            .register_parallel(move || Slow::new(&active, &peak))
            .unwrap();
    }
    let (client, _peer) = loopback_client(protocol).await;
    let handler = client.protocol().find(SLOW).unwrap();
    assert!(!handler.is_serial());

    let ctx = PacketContext { server: None, client: &client };
    let (a, b, c) = tokio::join!(
        dispatch_empty(handler, &ctx),
        dispatch_empty(handler, &ctx),
        dispatch_empty(handler, &ctx)
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    let PacketHandler::Parallel(pool, _) = handler else {
        panic!("expected a parallel handler");
    };
    assert_eq!(pool.instances_created(), 3);

    // Idle instances are reused rather than recreated
    dispatch_empty(handler, &ctx).await.unwrap();
    assert_eq!(pool.instances_created(), 3);

    // The registered sample never receives traffic
    let mut out = Vec::new();
    pool.sample().send(&ctx, &mut out).await.unwrap();
    assert_eq!(out, 0u32.to_be_bytes());
}

#[tokio::test]
async fn serial_dispatch_never_overlaps() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    protocol.register_serial(Slow::new(&active, &peak)).unwrap();
    let (client, _peer) = loopback_client(protocol).await;
    let handler = client.protocol().find(SLOW).unwrap();
    assert!(handler.is_serial());

    let ctx = PacketContext { server: None, client: &client };
    let (a, b, c) = tokio::join!(
        dispatch_empty(handler, &ctx),
        dispatch_empty(handler, &ctx),
        dispatch_empty(handler, &ctx)
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    // All three landed on the one shared instance
    let PacketHandler::Serial(instance, _) = handler else {
        panic!("expected a serial handler");
    };
    let mut out = Vec::new();
    instance.lock().await.send(&ctx, &mut out).await.unwrap();
    assert_eq!(out, 3u32.to_be_bytes());
}

#[tokio::test]
async fn udp_dispatch_reads_borrowed_payload() {
    let received = Arc::new(AtomicUsize::new(0));
    let mut protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Udp);
    protocol
        .register_serial(Counter { received: received.clone(), last: 0 })
        .unwrap();
    let (client, _peer) = loopback_client(protocol).await;
    let ctx = PacketContext { server: None, client: &client };
    let handler = client.protocol().find(COUNT).unwrap();

    // Header and payload in one local buffer, as the UDP loop receives them
    let mut datagram = vec![0u8; 12];
    datagram.extend_from_slice(&77u32.to_be_bytes());
    let mut payload = &datagram[12..];
    let mut reply = UdpReply::default();
    handler.receive_udp(&ctx, &mut payload, &mut reply).await.unwrap();

    assert!(payload.is_empty());
    assert!(reply.is_empty());
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ping_records_clock_offset() {
    let protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    let (client, _peer) = loopback_client(protocol).await;
    let ctx = PacketContext { server: None, client: &client };

    let remote = crate::utils::time::current_millis() + 60_000;
    let bytes = remote.to_be_bytes();
    let mut input: &[u8] = &bytes;
    client
        .protocol()
        .find(PING_MAGIC)
        .unwrap()
        .receive(&ctx, &mut input)
        .await
        .unwrap();

    assert_eq!(client.pings_received(), 1);
    let offset = client.clock_offset_millis();
    assert!((59_000..=60_000).contains(&offset), "offset {offset}");
}

// =================== Session loop ===================

#[tokio::test]
async fn unknown_packet_ends_session() {
    let protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    let (client, mut peer) = loopback_client(protocol).await;

    peer.write_all(b"NOPE").await.unwrap();
    let protocol = Arc::clone(client.protocol());
    let result = protocol.client_run(&client).await;

    assert!(matches!(result, Err(ProtocolError::UnknownPacket(m)) if m == Signature::from_tag("NOPE")));
    assert!(client.is_closed());

    // Socket released: the peer sees EOF
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).await.unwrap();
}

#[tokio::test]
async fn idle_session_sends_ping() {
    let protocol = Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let settings = ConnectionSettings {
        ping_delay: Duration::from_millis(20),
        ..ConnectionSettings::default()
    };
    let client = Arc::new(
        TcpClient::accepted(accepted.unwrap().0, Arc::new(protocol), 1, settings).unwrap(),
    );
    let mut peer = peer.unwrap();

    let session = Arc::clone(&client);
    let run = tokio::spawn(async move {
        let protocol = Arc::clone(session.protocol());
        protocol.client_run(&session).await
    });

    let mut frame = [0u8; 12];
    tokio::time::timeout(Duration::from_secs(2), peer.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame[..4], b"PING");

    client.close();
    run.await.unwrap().unwrap();
}

// =================== Handshake messages ===================

#[tokio::test]
async fn hello_messages_roundtrip() {
    let server = ServerHello {
        random_id: 0xdead_beef,
        server_name: "lobby".into(),
        motd: "welcome".into(),
    };
    let client = ClientHello {
        name: "alice".into(),
        uuid: "u-1".into(),
    };

    let mut wire = Vec::new();
    server.write_to(&mut wire).await.unwrap();
    client.write_to(&mut wire).await.unwrap();
    assert_eq!(&wire[..4], &[0xde, 0xad, 0xbe, 0xef]);

    let mut input: &[u8] = &wire;
    assert_eq!(ServerHello::read_from(&mut input).await.unwrap(), server);
    assert_eq!(ClientHello::read_from(&mut input).await.unwrap(), client);
    assert!(input.is_empty());
}

#[tokio::test]
async fn truncated_hello_is_an_error() {
    let mut wire = Vec::new();
    ClientHello { name: "bob".into(), uuid: String::new() }
        .write_to(&mut wire)
        .await
        .unwrap();
    wire.truncate(wire.len() - 1);
    let mut input: &[u8] = &wire;
    assert!(matches!(
        ClientHello::read_from(&mut input).await,
        Err(ProtocolError::Io(_))
    ));
}
