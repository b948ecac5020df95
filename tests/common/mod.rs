//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uniport::config::{ClientConfig, ServerConfig};
use uniport::core::stream::{read_string, write_string, PacketInput, PacketOutput};
use uniport::{
    async_trait, NetworkProtocol, Packet, PacketContext, Protocol, Result, Server, ServerHooks,
    Signature, UdpReply,
};

pub const TEST_PROTOCOL: Signature = Signature::from_tag("TEST");
pub const ECHO: Signature = Signature::from_tag("ECHO");

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// String packet that records what it receives and optionally answers.
pub struct EchoPacket {
    pub text: String,
    pub log: Log,
    pub echo_back: bool,
}

impl EchoPacket {
    pub fn message(text: &str) -> Self {
        Self {
            text: text.to_string(),
            log: new_log(),
            echo_back: false,
        }
    }

    pub fn recorder(log: &Log, echo_back: bool) -> Self {
        Self {
            text: String::new(),
            log: Arc::clone(log),
            echo_back,
        }
    }
}

#[async_trait]
impl Packet for EchoPacket {
    fn magic(&self) -> Signature {
        ECHO
    }

    async fn send(&self, _ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()> {
        write_string(out, &self.text).await
    }

    async fn receive(&mut self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        self.text = read_string(input).await?;
        self.log.lock().unwrap().push(self.text.clone());
        if self.echo_back {
            ctx.client
                .send_tcp(Arc::new(EchoPacket::message(&self.text)))
                .await?;
        }
        Ok(())
    }

    async fn receive_udp(
        &mut self,
        _ctx: &PacketContext<'_>,
        input: &mut PacketInput<'_>,
        reply: &mut UdpReply,
    ) -> Result<()> {
        self.text = read_string(input).await?;
        self.log.lock().unwrap().push(format!("udp:{}", self.text));
        if self.echo_back {
            reply.send(EchoPacket::message(&self.text));
        }
        Ok(())
    }
}

pub fn echo_protocol(log: &Log, echo_back: bool) -> Protocol {
    let mut protocol = Protocol::new(TEST_PROTOCOL, NetworkProtocol::Udp);
    protocol
        .register_serial(EchoPacket::recorder(log, echo_back))
        .unwrap();
    protocol
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".into(),
        name: "test-server".into(),
        motd: "hello there".into(),
        timeout: Duration::from_secs(2),
        ping_delay: Duration::from_millis(100),
        ..ServerConfig::default()
    }
}

pub fn client_config(tcp: SocketAddr, udp: Option<SocketAddr>) -> ClientConfig {
    ClientConfig {
        address: tcp.to_string(),
        udp_port: udp.map(|a| a.port()),
        name: "alice".into(),
        uuid: "uuid-alice".into(),
        connection_timeout: Duration::from_secs(2),
        ping_delay: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

/// Start a server on ephemeral ports with one protocol registered.
pub async fn start_server<H: ServerHooks>(
    config: ServerConfig,
    hooks: H,
    protocol: Protocol,
) -> (Arc<Server>, SocketAddr, Option<SocketAddr>) {
    let server = Arc::new(Server::with_hooks(config, hooks));
    server.register(Arc::new(protocol)).unwrap();
    server.start(Some(0), Some(0), true).await.unwrap();
    let tcp = server.tcp_addr().expect("tcp listener");
    let udp = server.udp_addr();
    (server, tcp, udp)
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
