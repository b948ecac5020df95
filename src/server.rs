//! # Server
//!
//! Hosts any number of protocols behind one TCP listener and one UDP listener.
//!
//! ## Connection Flow
//! 1. Accept, then filter by IP ([`ServerHooks::accepts_ip`])
//! 2. Read the 4-byte protocol magic and look the protocol up
//! 3. Assign a fresh random id and create the client ([`ServerHooks::create_client`])
//! 4. Run the protocol's handshake under the server timeout
//! 5. Register the client and drive the session until it closes
//! 6. Unregister the client and release its random id
//!
//! Every connection runs on its own task; a failing connection never affects
//! the others or the listeners.
//!
//! ## UDP Correlation
//! Datagrams are routed to a session by the random id in their header, and
//! only when they come from the same IP as that session's TCP peer.
//! Malformed, unroutable or filtered datagrams are dropped silently.

use dashmap::DashMap;
use futures::future::join_all;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::client::{ConnectionSettings, TcpClient};
use crate::config::ServerConfig;
use crate::core::signature::Signature;
use crate::core::stream::{FixedBuffer, MAX_DATAGRAM_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{NetworkProtocol, Packet, PacketContext, Protocol, UdpReply};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

/// Size of the UDP request header: protocol magic, packet magic, random id
pub const UDP_HEADER_SIZE: usize = 12;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Customization points for a server.
///
/// Every method has a default, so `impl ServerHooks for MyHooks {}` is valid.
pub trait ServerHooks: Send + Sync + 'static {
    /// Admission filter applied to TCP connections and UDP datagrams.
    fn accepts_ip(&self, _addr: SocketAddr) -> bool {
        true
    }

    /// Build the connection object for an accepted socket.
    fn create_client(
        &self,
        stream: TcpStream,
        protocol: Arc<Protocol>,
        random_id: u32,
        settings: ConnectionSettings,
    ) -> Result<TcpClient> {
        TcpClient::accepted(stream, protocol, random_id, settings)
    }

    /// Called after the handshake, once the client is registered.
    fn on_client_connected(&self, _server: &Server, _client: &Arc<TcpClient>) {}

    /// Called when a registered client's session ends.
    fn on_client_disconnected(&self, _server: &Server, _client: &Arc<TcpClient>) {}
}

/// Hooks with every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ServerHooks for DefaultHooks {}

#[derive(Default)]
struct Listener {
    addr: Option<SocketAddr>,
    token: Option<CancellationToken>,
}

impl Listener {
    fn replace(&mut self, addr: SocketAddr, token: CancellationToken) {
        if let Some(old) = self.token.replace(token) {
            old.cancel();
        }
        self.addr = Some(addr);
    }

    fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.addr = None;
    }
}

/// Multi-protocol TCP/UDP server.
///
/// Created with [`Server::new`] and used behind an `Arc`, since listener and
/// connection tasks keep a handle to it.
pub struct Server {
    config: ServerConfig,
    hooks: Arc<dyn ServerHooks>,
    protocols: RwLock<HashMap<Signature, Arc<Protocol>>>,
    clients: DashMap<u32, Arc<TcpClient>>,
    used_ids: Mutex<HashSet<u32>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    tcp: Mutex<Listener>,
    udp: Mutex<Listener>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_hooks(config, DefaultHooks)
    }

    pub fn with_hooks<H: ServerHooks>(config: ServerConfig, hooks: H) -> Self {
        Self {
            config,
            hooks: Arc::new(hooks),
            protocols: RwLock::new(HashMap::new()),
            clients: DashMap::new(),
            used_ids: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            tcp: Mutex::new(Listener::default()),
            udp: Mutex::new(Listener::default()),
            tasks: Mutex::new(Vec::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Register a protocol, replacing any previous one with the same magic.
    pub fn register(&self, protocol: Arc<Protocol>) -> Result<()> {
        self.ensure_open()?;
        let mut protocols = self
            .protocols
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        let magic = protocol.magic();
        if protocols.insert(magic, protocol).is_some() {
            debug!(protocol = %magic, "Replaced registered protocol");
        } else {
            debug!(protocol = %magic, "Registered protocol");
        }
        Ok(())
    }

    pub fn protocol(&self, magic: Signature) -> Option<Arc<Protocol>> {
        self.protocols
            .read()
            .ok()
            .and_then(|protocols| protocols.get(&magic).cloned())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ProtocolError::ServerClosed)
        } else {
            Ok(())
        }
    }

    /// Listeners can only start while the server is neither stopped nor closed.
    fn ensure_startable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_running() {
            Ok(())
        } else {
            Err(ProtocolError::ServerClosed)
        }
    }

    /// Whether the server has not been stopped or closed.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.lock().ok().and_then(|l| l.addr)
    }

    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.lock().ok().and_then(|l| l.addr)
    }

    /// Start the listeners the registered protocols need.
    ///
    /// Every protocol needs the TCP listener; the UDP listener starts only
    /// when some protocol uses UDP. `None` skips a listener.
    pub async fn start(
        self: &Arc<Self>,
        tcp_port: Option<u16>,
        udp_port: Option<u16>,
        close_tcp_if_udp_fails: bool,
    ) -> Result<()> {
        self.ensure_startable()?;
        let transports: Vec<NetworkProtocol> = self
            .protocols
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .values()
            .map(|p| p.transport())
            .collect();

        if transports.contains(&NetworkProtocol::TcpTls) {
            warn!("TLS transport is not implemented; TcpTls protocols are served as plain TCP");
        }

        if let Some(port) = tcp_port.filter(|_| !transports.is_empty()) {
            self.start_tcp(port).await?;
        }
        if let Some(port) = udp_port.filter(|_| transports.iter().any(|t| t.uses_udp())) {
            self.start_udp(port, close_tcp_if_udp_fails).await?;
        }
        Ok(())
    }

    /// Start the listeners configured in [`ServerConfig`].
    pub async fn start_from_config(self: &Arc<Self>) -> Result<()> {
        self.start(
            self.config.tcp_port,
            self.config.udp_port,
            self.config.close_tcp_if_udp_fails,
        )
        .await
    }

    /// Bind the TCP listener and spawn its accept loop.
    ///
    /// A running TCP listener is replaced. Returns the bound address.
    #[instrument(skip(self), fields(bind = %self.config.bind_address))]
    pub async fn start_tcp(self: &Arc<Self>, port: u16) -> Result<SocketAddr> {
        self.ensure_startable()?;
        let listener = TcpListener::bind((self.config.bind_address.as_str(), port)).await?;
        let addr = listener.local_addr()?;
        let token = self.shutdown.child_token();
        if let Ok(mut tcp) = self.tcp.lock() {
            tcp.replace(addr, token.clone());
        }
        info!(%addr, "TCP listener started");

        let server = Arc::clone(self);
        self.track(tokio::spawn(server.run_tcp(listener, token)));
        Ok(addr)
    }

    /// Bind the UDP listener and spawn its receive loop.
    ///
    /// On bind failure the TCP listener is stopped too when
    /// `close_tcp_if_udp_fails` is set.
    #[instrument(skip(self), fields(bind = %self.config.bind_address))]
    pub async fn start_udp(self: &Arc<Self>, port: u16, close_tcp_if_udp_fails: bool) -> Result<SocketAddr> {
        self.ensure_startable()?;
        let socket = match UdpSocket::bind((self.config.bind_address.as_str(), port)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(port, error = %e, "UDP bind failed");
                if close_tcp_if_udp_fails {
                    if let Ok(mut tcp) = self.tcp.lock() {
                        tcp.stop();
                    }
                    info!("TCP listener stopped after UDP bind failure");
                }
                return Err(e.into());
            }
        };
        let addr = socket.local_addr()?;
        let token = self.shutdown.child_token();
        if let Ok(mut udp) = self.udp.lock() {
            udp.replace(addr, token.clone());
        }
        info!(%addr, "UDP listener started");

        let server = Arc::clone(self);
        self.track(tokio::spawn(server.run_udp(socket, token)));
        Ok(addr)
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    async fn run_tcp(self: Arc<Self>, listener: TcpListener, token: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if !self.hooks.accepts_ip(peer) {
                        debug!(%peer, "Connection refused by IP filter");
                        continue;
                    }
                    if self.clients.len() >= self.config.max_connections {
                        warn!(%peer, max = self.config.max_connections, "Connection limit reached, refusing");
                        self.metrics.connection_error();
                        continue;
                    }
                    let server = Arc::clone(&self);
                    tokio::spawn(server.handle_connection(stream, peer));
                }
                Err(e) => {
                    if token.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, "Accept failed");
                    self.metrics.connection_error();
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        debug!("TCP accept loop stopped");
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let magic = match with_timeout_error(
            async { Ok(stream.read_u32().await?) },
            self.config.timeout,
        )
        .await
        {
            Ok(magic) => Signature::from_u32(magic),
            Err(e) => {
                debug!(%peer, error = %e, "No protocol magic received");
                return;
            }
        };

        let Some(protocol) = self.protocol(magic) else {
            let err = ProtocolError::UnknownProtocol(magic);
            info!(%peer, "{err}");
            self.metrics.protocol_error();
            let _ = stream.shutdown().await;
            return;
        };

        let random_id = match self.create_random_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(%peer, error = %e, "Could not assign random id");
                return;
            }
        };

        match self.serve_client(stream, protocol, random_id).await {
            Ok(()) => {}
            Err(e) if e.is_transport() || !self.is_running() => {
                debug!(%peer, error = %e, "Connection ended");
            }
            Err(e) => {
                warn!(%peer, error = %e, "Connection ended with error");
                self.metrics.connection_error();
            }
        }
        self.destroy_random_id(random_id);
    }

    async fn serve_client(
        self: &Arc<Self>,
        stream: TcpStream,
        protocol: Arc<Protocol>,
        random_id: u32,
    ) -> Result<()> {
        let settings = ConnectionSettings::from(&self.config);
        let client = Arc::new(
            self.hooks
                .create_client(stream, Arc::clone(&protocol), random_id, settings)?,
        );
        client.attach_server(Arc::downgrade(self), Arc::clone(&self.metrics));
        let peer = client.peer_addr();

        self.metrics.handshake_attempt();
        let handshake = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ServerClosed),
            outcome = with_timeout_error(protocol.server_handshake(self, &client), self.config.timeout) => outcome,
        };
        match handshake {
            Ok(true) => self.metrics.handshake_success(),
            Ok(false) => {
                self.metrics.handshake_failed();
                if self.config.log_rejections {
                    info!(%peer, protocol = %protocol.magic(), "Handshake rejected");
                }
                client.close();
                return Ok(());
            }
            Err(e) => {
                self.metrics.handshake_failed();
                if self.config.log_rejections {
                    info!(%peer, protocol = %protocol.magic(), error = %e, "Handshake failed");
                }
                client.close();
                return Ok(());
            }
        }

        self.clients.insert(random_id, Arc::clone(&client));
        if !self.is_running() {
            self.clients.remove(&random_id);
            client.close();
            return Err(ProtocolError::ServerClosed);
        }
        self.metrics.connection_established();
        client.set_running();
        info!(%peer, random_id, name = %client.name(), protocol = %protocol.magic(), "Client connected");
        self.hooks.on_client_connected(self, &client);

        let result = protocol.server_run(self, &client).await;

        self.hooks.on_client_disconnected(self, &client);
        self.remove_client(&client);
        self.metrics.connection_closed();
        client.close();
        info!(%peer, random_id, "Client disconnected");
        result
    }

    fn create_random_id(&self) -> Result<u32> {
        let mut used = self
            .used_ids
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        let mut rng = rand::rng();
        loop {
            let id: u32 = rng.random();
            if id != 0 && used.insert(id) {
                return Ok(id);
            }
        }
    }

    fn destroy_random_id(&self, random_id: u32) {
        if let Ok(mut used) = self.used_ids.lock() {
            used.remove(&random_id);
        }
    }

    async fn run_udp(self: Arc<Self>, socket: UdpSocket, token: CancellationToken) {
        let mut inbound = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut outbound = FixedBuffer::datagram();
        let mut replies = UdpReply::default();

        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = socket.recv_from(&mut inbound) => received,
            };
            let (len, sender) = match received {
                Ok(received) => received,
                Err(e) => {
                    // ICMP unreachable from an earlier reply surfaces here on some platforms
                    debug!(error = %e, "UDP receive failed");
                    continue;
                }
            };

            self.metrics.udp_received();
            if let Err(e) = self
                .handle_datagram(&socket, &inbound[..len], sender, &mut outbound, &mut replies)
                .await
            {
                debug!(%sender, error = %e, "UDP packet handling failed");
                self.metrics.protocol_error();
            }
        }
        debug!("UDP receive loop stopped");
    }

    async fn handle_datagram(
        &self,
        socket: &UdpSocket,
        datagram: &[u8],
        sender: SocketAddr,
        outbound: &mut FixedBuffer,
        replies: &mut UdpReply,
    ) -> Result<()> {
        if datagram.len() < UDP_HEADER_SIZE {
            return self.discard(sender, "short datagram");
        }
        if !self.hooks.accepts_ip(sender) {
            return self.discard(sender, "refused by IP filter");
        }

        let protocol_magic = Signature::from_be_bytes(word(datagram, 0));
        let packet_magic = Signature::from_be_bytes(word(datagram, 4));
        let random_id = u32::from_be_bytes(word(datagram, 8));

        let Some(protocol) = self.protocol(protocol_magic) else {
            return self.discard(sender, "unknown protocol");
        };
        let Some(client) = self.find_udp_client(sender, random_id) else {
            return self.discard(sender, "no matching session");
        };
        if client.protocol().magic() != protocol_magic {
            return self.discard(sender, "session speaks another protocol");
        }
        let Some(handler) = protocol.find(packet_magic) else {
            return self.discard(sender, "unknown packet");
        };

        trace!(%sender, packet = %packet_magic, random_id, "Dispatching datagram");
        let ctx = PacketContext {
            server: Some(self),
            client: &client,
        };
        replies.clear();
        let mut payload = &datagram[UDP_HEADER_SIZE..];
        handler.receive_udp(&ctx, &mut payload, replies).await?;

        for response in replies.drain() {
            outbound.reset();
            outbound.write_u32(response.magic().as_u32()).await?;
            response
                .send(&ctx, outbound)
                .await
                .map_err(|e| outbound.classify(e))?;
            socket.send_to(outbound.as_slice(), sender).await?;
        }
        Ok(())
    }

    fn discard(&self, sender: SocketAddr, reason: &'static str) -> Result<()> {
        trace!(%sender, reason, "Datagram discarded");
        self.metrics.udp_discarded();
        Ok(())
    }

    /// Session for a datagram: matching random id and the same source IP.
    fn find_udp_client(&self, sender: SocketAddr, random_id: u32) -> Option<Arc<TcpClient>> {
        self.clients
            .get(&random_id)
            .filter(|client| client.peer_addr().ip().to_canonical() == sender.ip().to_canonical())
            .map(|client| Arc::clone(client.value()))
    }

    /// Snapshot of the registered clients.
    pub fn clients(&self) -> Vec<Arc<TcpClient>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn find_client(&self, random_id: u32) -> Option<Arc<TcpClient>> {
        self.clients.get(&random_id).map(|c| Arc::clone(c.value()))
    }

    /// Unregister a client. Returns whether it was registered.
    pub fn remove_client(&self, client: &TcpClient) -> bool {
        self.clients
            .remove_if(&client.random_id(), |_, registered| {
                std::ptr::eq(Arc::as_ptr(registered), client)
            })
            .is_some()
    }

    /// Run `callback` for every registered client.
    ///
    /// Iterates over a snapshot. A client whose callback fails with a
    /// transport error is closed and unregistered; iteration continues.
    pub fn for_all_clients<F>(&self, mut callback: F)
    where
        F: FnMut(&Arc<TcpClient>) -> Result<()>,
    {
        for client in self.clients() {
            if let Err(e) = callback(&client) {
                self.handle_client_error(&client, &e);
            }
        }
    }

    fn handle_client_error(&self, client: &Arc<TcpClient>, err: &ProtocolError) {
        if err.is_transport() {
            debug!(peer = %client.peer_addr(), error = %err, "Dropping unreachable client");
            self.remove_client(client);
            client.close();
        } else {
            warn!(peer = %client.peer_addr(), error = %err, "Client operation failed");
        }
    }

    /// Queue `packet` on every client whose protocol registers it.
    ///
    /// Returns the number of clients it was queued for.
    pub async fn broadcast(&self, packet: Arc<dyn Packet>) -> usize {
        self.broadcast_filtered(packet, None).await
    }

    /// Like [`Server::broadcast`], skipping `except`.
    pub async fn broadcast_except(&self, packet: Arc<dyn Packet>, except: &TcpClient) -> usize {
        self.broadcast_filtered(packet, Some(except)).await
    }

    async fn broadcast_filtered(&self, packet: Arc<dyn Packet>, except: Option<&TcpClient>) -> usize {
        let magic = packet.magic();
        let mut delivered = 0;
        for client in self.clients() {
            if except.is_some_and(|skip| std::ptr::eq(Arc::as_ptr(&client), skip)) {
                continue;
            }
            if !client.protocol().contains(magic) {
                continue;
            }
            match client.send_tcp(Arc::clone(&packet)).await {
                Ok(()) => delivered += 1,
                Err(e) => self.handle_client_error(&client, &e),
            }
        }
        delivered
    }

    /// Stop both listeners and every session loop.
    ///
    /// Sessions close themselves as their loops exit. Protocols and the
    /// registry stay in place; use [`Server::close`] to tear down.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Ok(mut tcp) = self.tcp.lock() {
            tcp.stop();
        }
        if let Ok(mut udp) = self.udp.lock() {
            udp.stop();
        }
    }

    /// Stop everything and close all clients. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();

        let clients = self.clients();
        self.clients.clear();
        for client in &clients {
            client.close();
        }
        info!(clients = clients.len(), "Server closed");
    }

    /// Close and wait for the listener tasks to finish.
    pub async fn shutdown(&self) {
        self.close();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                debug!(error = %e, "Listener task ended abnormally");
            }
        }
    }
}

#[inline]
fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.name)
            .field("tcp_addr", &self.tcp_addr())
            .field("udp_addr", &self.udp_addr())
            .field("clients", &self.client_count())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn test_server() -> Arc<Server> {
        let config = ServerConfig {
            bind_address: "127.0.0.1".into(),
            ..ServerConfig::default()
        };
        Arc::new(Server::new(config))
    }

    #[test]
    fn random_ids_unique_and_nonzero() {
        let server = test_server();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = server.create_random_id().unwrap();
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
        let first = *seen.iter().next().unwrap();
        server.destroy_random_id(first);
        assert!(!server.used_ids.lock().unwrap().contains(&first));
    }

    #[tokio::test]
    async fn start_after_close_fails() {
        let server = test_server();
        server.close();
        server.close();
        assert!(!server.is_running());
        assert!(matches!(server.start_tcp(0).await, Err(ProtocolError::ServerClosed)));
        let protocol = Arc::new(Protocol::new(Signature::from_tag("TEST"), NetworkProtocol::Tcp));
        assert!(matches!(server.register(protocol), Err(ProtocolError::ServerClosed)));
    }

    #[tokio::test]
    async fn start_after_stop_fails() {
        let server = test_server();
        server
            .register(Arc::new(Protocol::new(Signature::from_tag("UDPP"), NetworkProtocol::Udp)))
            .unwrap();
        server.start_tcp(0).await.unwrap();
        server.stop();
        assert!(server.tcp_addr().is_none());

        assert!(matches!(server.start_tcp(0).await, Err(ProtocolError::ServerClosed)));
        assert!(matches!(server.start_udp(0, false).await, Err(ProtocolError::ServerClosed)));
        assert!(matches!(
            server.start(Some(0), Some(0), false).await,
            Err(ProtocolError::ServerClosed)
        ));
        assert!(server.tcp_addr().is_none());
        assert!(server.udp_addr().is_none());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn start_without_protocols_binds_nothing() {
        let server = test_server();
        server.start(Some(0), Some(0), true).await.unwrap();
        assert!(server.tcp_addr().is_none());
        assert!(server.udp_addr().is_none());
    }

    #[tokio::test]
    async fn udp_listener_only_for_udp_protocols() {
        let server = test_server();
        server
            .register(Arc::new(Protocol::new(Signature::from_tag("TCPP"), NetworkProtocol::Tcp)))
            .unwrap();
        server.start(Some(0), Some(0), true).await.unwrap();
        assert!(server.tcp_addr().is_some());
        assert!(server.udp_addr().is_none());
        server.shutdown().await;
        assert!(server.tcp_addr().is_none());
    }

    #[tokio::test]
    async fn udp_bind_failure_stops_tcp() {
        let server = test_server();
        server
            .register(Arc::new(Protocol::new(Signature::from_tag("UDPP"), NetworkProtocol::Udp)))
            .unwrap();
        let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let taken = blocker.local_addr().unwrap().port();

        server.start_tcp(0).await.unwrap();
        assert!(server.start_udp(taken, true).await.is_err());
        assert!(server.tcp_addr().is_none());
        server.shutdown().await;
    }
}
