//! # TCP Connections
//!
//! [`TcpClient`] is one end of a TCP connection, on either side: the server
//! creates one per accepted socket and applications create one with
//! [`TcpClient::connect`].
//!
//! ## Outgoing Queue
//! Packets are sent through a bounded FIFO drained by a writer task. When the
//! queue is full:
//! - a droppable packet is discarded
//! - a non-droppable packet evicts the oldest queued droppable packet
//! - otherwise the sender waits for room until its deadline, after which the
//!   connection is closed and [`ProtocolError::QueueOverflow`] is returned
//!
//! The queue never holds more than `packet_limit` entries.
//!
//! ## Lifecycle
//! `Connecting` until the handshake succeeds, then `Running`, then `Closed`.
//! Closing is idempotent and releases the socket exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, MappedMutexGuard, MutexGuard, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{ClientConfig, ServerConfig, DEFAULT_PACKET_LIMIT};
use crate::core::signature::Signature;
use crate::core::stream::{split_stream, ConnectionReader, ConnectionWriter, PacketOutput};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{Packet, PacketContext, Protocol};
use crate::server::Server;
use crate::utils::metrics::Metrics;
use crate::utils::time::current_millis;
use crate::utils::timeout::{self, with_timeout_error, QUEUE_RECHECK_INTERVAL};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Running,
    Closed,
}

/// Which end of the connection this client represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Accepted by a [`Server`]
    Server,
    /// Opened with [`TcpClient::connect`]
    Client,
}

/// Per-connection tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Outgoing queue capacity
    pub packet_limit: usize,
    /// Idle time before a keepalive ping
    pub ping_delay: Duration,
    /// Handshake deadline and default queue wait
    pub timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            packet_limit: DEFAULT_PACKET_LIMIT,
            ping_delay: timeout::KEEPALIVE_INTERVAL,
            timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            packet_limit: config.packet_limit.max(1),
            ping_delay: config.ping_delay,
            timeout: config.timeout,
        }
    }
}

impl From<&ClientConfig> for ConnectionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            packet_limit: config.packet_limit.max(1),
            ping_delay: config.ping_delay,
            timeout: config.connection_timeout,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Identity {
    name: String,
    uuid: String,
    server_name: String,
    motd: String,
}

enum Enqueue {
    Queued,
    Dropped,
    Full,
}

/// One end of a TCP connection.
pub struct TcpClient {
    protocol: Arc<Protocol>,
    side: Side,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    settings: ConnectionSettings,
    random_id: AtomicU32,
    udp_port: Mutex<Option<u16>>,
    identity: RwLock<Identity>,
    reader: tokio::sync::Mutex<Option<ConnectionReader>>,
    writer: tokio::sync::Mutex<Option<ConnectionWriter>>,
    queue: Mutex<VecDeque<Arc<dyn Packet>>>,
    queue_ready: Notify,
    queue_space: Notify,
    state: watch::Sender<ConnectionState>,
    token: CancellationToken,
    closed: AtomicBool,
    clock_offset: AtomicI64,
    pings_received: AtomicU64,
    server: OnceLock<Weak<Server>>,
    metrics: OnceLock<Arc<Metrics>>,
}

impl TcpClient {
    fn new(
        stream: TcpStream,
        protocol: Arc<Protocol>,
        side: Side,
        random_id: u32,
        settings: ConnectionSettings,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = split_stream(stream);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Ok(Self {
            protocol,
            side,
            peer_addr,
            local_addr,
            settings,
            random_id: AtomicU32::new(random_id),
            udp_port: Mutex::new(None),
            identity: RwLock::new(Identity::default()),
            reader: tokio::sync::Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            queue: Mutex::new(VecDeque::new()),
            queue_ready: Notify::new(),
            queue_space: Notify::new(),
            state,
            token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            clock_offset: AtomicI64::new(0),
            pings_received: AtomicU64::new(0),
            server: OnceLock::new(),
            metrics: OnceLock::new(),
        })
    }

    /// Wrap a socket accepted by a server.
    ///
    /// This is what [`ServerHooks::create_client`](crate::ServerHooks::create_client)
    /// returns by default.
    pub fn accepted(
        stream: TcpStream,
        protocol: Arc<Protocol>,
        random_id: u32,
        settings: ConnectionSettings,
    ) -> Result<Self> {
        Self::new(stream, protocol, Side::Server, random_id, settings)
    }

    /// Wrap an already connected socket without opening the session.
    ///
    /// Call [`TcpClient::start_client_side`] to send the protocol magic, run
    /// the handshake and drive the connection.
    pub fn from_stream(stream: TcpStream, protocol: Arc<Protocol>, config: &ClientConfig) -> Result<Self> {
        let client = Self::new(stream, protocol, Side::Client, 0, ConnectionSettings::from(config))?;
        client.set_identity(config.name.clone(), config.uuid.clone());
        client.set_udp_port(config.udp_port);
        let _ = client.metrics.set(Arc::new(Metrics::new()));
        Ok(client)
    }

    /// Connect, handshake and spawn the session.
    ///
    /// Returns once the connection is `Running`.
    #[instrument(skip(protocol, config), fields(address = %config.address, protocol = %protocol.magic()))]
    pub async fn connect(protocol: Arc<Protocol>, config: &ClientConfig) -> Result<Arc<Self>> {
        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(config.address.as_str()).await?) },
            config.connection_timeout,
        )
        .await?;

        let client = Arc::new(Self::from_stream(stream, protocol, config)?);
        client.open_client_side().await?;
        info!(random_id = client.random_id(), server = %client.server_name(), "Connected");

        let session = Arc::clone(&client);
        tokio::spawn(async move {
            let protocol = Arc::clone(session.protocol());
            if let Err(e) = protocol.client_run(&session).await {
                debug!(peer = %session.peer_addr(), error = %e, "Client session ended with error");
            }
        });
        Ok(client)
    }

    /// Open the session and drive it on the calling task until it closes.
    pub async fn start_client_side(self: &Arc<Self>) -> Result<()> {
        self.open_client_side().await?;
        let protocol = Arc::clone(&self.protocol);
        protocol.client_run(self).await
    }

    async fn open_client_side(&self) -> Result<()> {
        {
            let mut writer = self.lock_writer().await?;
            writer.write_u32(self.protocol.magic().as_u32()).await?;
            writer.flush().await?;
        }

        let outcome = with_timeout_error(
            self.protocol.client_handshake(self),
            self.settings.timeout,
        )
        .await;
        match outcome {
            Ok(true) => {
                self.set_running();
                Ok(())
            }
            Ok(false) => {
                self.close();
                Err(ProtocolError::HandshakeError(
                    constants::ERR_HANDSHAKE_REJECTED.to_string(),
                ))
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    pub(crate) fn attach_server(&self, server: Weak<Server>, metrics: Arc<Metrics>) {
        let _ = self.server.set(server);
        let _ = self.metrics.set(metrics);
    }

    /// The owning server, for server-side connections.
    pub fn server(&self) -> Option<Arc<Server>> {
        self.server.get().and_then(Weak::upgrade)
    }

    /// Counters for this connection; shared with the server on accepted connections.
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.get()
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Session id assigned by the server; 0 before the handshake on the client side.
    pub fn random_id(&self) -> u32 {
        self.random_id.load(Ordering::Acquire)
    }

    pub fn set_random_id(&self, random_id: u32) {
        self.random_id.store(random_id, Ordering::Release);
    }

    pub fn name(&self) -> String {
        self.identity.read().map(|i| i.name.clone()).unwrap_or_default()
    }

    pub fn uuid(&self) -> String {
        self.identity.read().map(|i| i.uuid.clone()).unwrap_or_default()
    }

    pub fn server_name(&self) -> String {
        self.identity
            .read()
            .map(|i| i.server_name.clone())
            .unwrap_or_default()
    }

    pub fn motd(&self) -> String {
        self.identity.read().map(|i| i.motd.clone()).unwrap_or_default()
    }

    pub fn set_identity(&self, name: String, uuid: String) {
        if let Ok(mut identity) = self.identity.write() {
            identity.name = name;
            identity.uuid = uuid;
        }
    }

    pub fn set_server_info(&self, server_name: String, motd: String) {
        if let Ok(mut identity) = self.identity.write() {
            identity.server_name = server_name;
            identity.motd = motd;
        }
    }

    /// Remote UDP port used by [`UdpSender`](crate::UdpSender).
    pub fn udp_port(&self) -> Option<u16> {
        self.udp_port.lock().ok().and_then(|port| *port)
    }

    pub fn set_udp_port(&self, port: Option<u16>) {
        if let Ok(mut current) = self.udp_port.lock() {
            *current = port;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait until the connection leaves `Connecting`.
    ///
    /// Fails with `Timeout` if still connecting after `timeout`, or with
    /// `ConnectionClosed` if the connection closed instead.
    pub async fn ensure_connection(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.subscribe();
        let reached = with_timeout_error(
            async {
                let reached = state
                    .wait_for(|s| *s != ConnectionState::Connecting)
                    .await
                    .map_err(|_| ProtocolError::ConnectionClosed)?;
                Ok(*reached)
            },
            timeout,
        )
        .await?;

        match reached {
            ConnectionState::Running => Ok(()),
            _ => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Lock the read half, for custom handshakes.
    pub async fn lock_reader(&self) -> Result<MappedMutexGuard<'_, ConnectionReader>> {
        MutexGuard::try_map(self.reader.lock().await, Option::as_mut)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Lock the write half, for custom handshakes.
    pub async fn lock_writer(&self) -> Result<MappedMutexGuard<'_, ConnectionWriter>> {
        MutexGuard::try_map(self.writer.lock().await, Option::as_mut)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Queue a packet, waiting at most the connection timeout for room.
    pub async fn send_tcp(&self, packet: Arc<dyn Packet>) -> Result<()> {
        self.send_tcp_timeout(packet, Duration::ZERO).await
    }

    /// Queue a packet, waiting at most `max_wait` for room.
    ///
    /// A zero `max_wait` means the connection timeout.
    pub async fn send_tcp_timeout(&self, packet: Arc<dyn Packet>, max_wait: Duration) -> Result<()> {
        let magic = packet.magic();
        if !self.protocol.contains(magic) {
            return Err(ProtocolError::UnregisteredPacket(magic));
        }

        let max_wait = if max_wait.is_zero() {
            self.settings.timeout
        } else {
            max_wait
        };
        let started = Instant::now();
        // None when the wait is too long to represent: wait until room or close
        let deadline = started.checked_add(max_wait);

        loop {
            if self.is_closed() {
                return Err(ProtocolError::ConnectionClosed);
            }

            match self.try_enqueue(&packet)? {
                Enqueue::Queued => {
                    self.queue_ready.notify_one();
                    return Ok(());
                }
                Enqueue::Dropped => return Ok(()),
                Enqueue::Full => {}
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                warn!(
                    peer = %self.peer_addr,
                    packet = %magic,
                    waited_ms,
                    "Outgoing queue stayed full, closing connection"
                );
                self.record_connection_error();
                self.close();
                return Err(ProtocolError::QueueOverflow { magic, waited_ms });
            }

            let wait = deadline.map_or(QUEUE_RECHECK_INTERVAL, |deadline| {
                deadline.duration_since(now).min(QUEUE_RECHECK_INTERVAL)
            });
            tokio::select! {
                _ = self.token.cancelled() => return Err(ProtocolError::ConnectionClosed),
                _ = self.queue_space.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn try_enqueue(&self, packet: &Arc<dyn Packet>) -> Result<Enqueue> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;

        if queue.len() < self.settings.packet_limit {
            queue.push_back(Arc::clone(packet));
            return Ok(Enqueue::Queued);
        }

        if packet.can_drop() {
            debug!(peer = %self.peer_addr, packet = %packet.magic(), "Queue full, dropping packet");
            if let Some(metrics) = self.metrics.get() {
                metrics.packet_dropped();
            }
            return Ok(Enqueue::Dropped);
        }

        if let Some(pos) = queue.iter().position(|queued| queued.can_drop()) {
            if let Some(evicted) = queue.remove(pos) {
                debug!(
                    peer = %self.peer_addr,
                    evicted = %evicted.magic(),
                    packet = %packet.magic(),
                    "Queue full, evicting droppable packet"
                );
            }
            queue.push_back(Arc::clone(packet));
            if let Some(metrics) = self.metrics.get() {
                metrics.packet_evicted();
            }
            return Ok(Enqueue::Queued);
        }

        Ok(Enqueue::Full)
    }

    /// Number of packets waiting to be written.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Magics of the queued packets, oldest first.
    pub fn queued_magics(&self) -> Vec<Signature> {
        self.queue
            .lock()
            .map(|q| q.iter().map(|p| p.magic()).collect())
            .unwrap_or_default()
    }

    fn pop_packet(&self) -> Option<Arc<dyn Packet>> {
        let packet = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        if packet.is_some() {
            self.queue_space.notify_waiters();
        }
        packet
    }

    /// Writer task: drains the outgoing queue until the connection closes.
    pub async fn work_packet_tasks(self: Arc<Self>) {
        let server = self.server();
        let ctx = PacketContext {
            server: server.as_deref(),
            client: &self,
        };

        if let Err(e) = self.drain_queue(&ctx).await {
            if !self.is_closed() {
                warn!(peer = %self.peer_addr, error = %e, "Write failed, closing connection");
                self.record_connection_error();
            }
        }
        self.close();
    }

    async fn drain_queue(&self, ctx: &PacketContext<'_>) -> Result<()> {
        loop {
            let Some(first) = self.pop_packet() else {
                tokio::select! {
                    _ = self.token.cancelled() => return Ok(()),
                    _ = self.queue_ready.notified() => continue,
                }
            };

            let mut writer = self.lock_writer().await?;
            let mut next = Some(first);
            while let Some(packet) = next {
                tokio::select! {
                    _ = self.token.cancelled() => return Ok(()),
                    written = self.write_packet(ctx, &mut *writer, packet.as_ref()) => written?,
                }
                next = self.pop_packet();
            }
            tokio::select! {
                _ = self.token.cancelled() => return Ok(()),
                flushed = writer.flush() => flushed?,
            }
        }
    }

    async fn write_packet(&self, ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>, packet: &dyn Packet) -> Result<()> {
        let magic = packet.magic();
        out.write_u32(magic.as_u32()).await?;
        packet.send(ctx, out).await?;
        trace!(peer = %self.peer_addr, packet = %magic, "Packet written");
        if let Some(metrics) = self.metrics.get() {
            metrics.packet_sent();
        }
        Ok(())
    }

    pub(crate) fn record_ping(&self, remote_millis: i64) {
        self.clock_offset
            .store(remote_millis - current_millis(), Ordering::Relaxed);
        self.pings_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Remote clock minus local clock, from the last ping.
    pub fn clock_offset_millis(&self) -> i64 {
        self.clock_offset.load(Ordering::Relaxed)
    }

    pub fn pings_received(&self) -> u64 {
        self.pings_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_packet_received(&self) {
        if let Some(metrics) = self.metrics.get() {
            metrics.packet_received();
        }
    }

    pub(crate) fn record_protocol_error(&self) {
        if let Some(metrics) = self.metrics.get() {
            metrics.protocol_error();
        }
    }

    fn record_connection_error(&self) {
        if let Some(metrics) = self.metrics.get() {
            metrics.connection_error();
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Stops both loops, fails pending and future sends, and releases the
    /// socket once neither loop holds a stream half.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.cancel();
        self.state.send_replace(ConnectionState::Closed);
        self.queue_space.notify_waiters();
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        debug!(peer = %self.peer_addr, random_id = self.random_id(), "Connection closed");
    }

    pub(crate) async fn release_streams(&self) {
        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}

impl fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("protocol", &self.protocol.magic())
            .field("side", &self.side)
            .field("peer_addr", &self.peer_addr)
            .field("random_id", &self.random_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
