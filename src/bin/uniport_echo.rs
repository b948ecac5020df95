//! Echo demo.
//!
//! ```text
//! uniport-echo server [config.toml]
//! uniport-echo client <address> <message>
//! ```
//!
//! The server echoes every `ECHO` packet back to its sender, over TCP or as a
//! UDP reply. The client sends one message both ways and prints the answers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};
use uniport::config::{ClientConfig, LoggingConfig, NetworkConfig};
use uniport::core::stream::{read_string, write_string, PacketInput, PacketOutput};
use uniport::utils::logging::init_logging;
use uniport::{
    async_trait, NetworkProtocol, Packet, PacketContext, Protocol, Result, Server, Signature,
    TcpClient, UdpReply, UdpSender,
};

const ECHO_PROTOCOL: Signature = Signature::from_tag("ECHP");
const ECHO: Signature = Signature::from_tag("ECHO");

#[derive(Default)]
struct Echo {
    text: String,
    answer: bool,
    seen: Option<Arc<Notify>>,
}

impl Echo {
    fn message(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Packet for Echo {
    fn magic(&self) -> Signature {
        ECHO
    }

    async fn send(&self, _ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()> {
        write_string(out, &self.text).await
    }

    async fn receive(&mut self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        self.text = read_string(input).await?;
        if self.answer {
            ctx.client.send_tcp(Arc::new(Echo::message(&self.text))).await?;
        } else {
            info!(text = %self.text, "TCP echo");
            if let Some(seen) = &self.seen {
                seen.notify_one();
            }
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
        if self.answer {
            reply.send(Echo::message(&self.text));
        } else {
            info!(text = %self.text, "UDP echo");
        }
        Ok(())
    }
}

fn echo_protocol(echo: Echo) -> Result<Arc<Protocol>> {
    let mut protocol = Protocol::new(ECHO_PROTOCOL, NetworkProtocol::Udp);
    protocol.register_serial(echo)?;
    Ok(Arc::new(protocol))
}

async fn run_server(config_path: Option<String>) -> Result<()> {
    let config = match config_path {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::from_env()?,
    };
    init_logging(&config.logging)?;
    for issue in config.validate() {
        warn!(issue = %issue, "Configuration issue");
    }

    let server = Arc::new(Server::new(config.server.clone()));
    server.register(echo_protocol(Echo {
        answer: true,
        ..Echo::default()
    })?)?;
    server.start_from_config().await?;
    info!(tcp = ?server.tcp_addr(), udp = ?server.udp_addr(), "Echo server running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for CTRL+C");
    }
    info!("Shutting down");
    server.shutdown().await;
    server.metrics().log_metrics();
    Ok(())
}

async fn run_client(address: String, message: String) -> Result<()> {
    init_logging(&LoggingConfig::default())?;
    let seen = Arc::new(Notify::new());
    let protocol = echo_protocol(Echo {
        seen: Some(Arc::clone(&seen)),
        ..Echo::default()
    })?;

    let config = ClientConfig {
        address,
        name: String::from("echo-client"),
        ..ClientConfig::default()
    };
    let client = TcpClient::connect(Arc::clone(&protocol), &config).await?;
    info!(random_id = client.random_id(), motd = %client.motd(), "Connected");

    client.send_tcp(Arc::new(Echo::message(&message))).await?;
    if tokio::time::timeout(Duration::from_secs(3), seen.notified())
        .await
        .is_err()
    {
        warn!("No TCP echo within 3s");
    }

    let sender = UdpSender::new(protocol, Arc::clone(&client));
    let udp = tokio::time::timeout(
        Duration::from_secs(3),
        sender.send_with_reply(&Echo::message(&message), |magic| {
            info!(reply = %magic, "UDP reply handled");
        }),
    )
    .await;
    match udp {
        Ok(result) => result?,
        Err(_) => warn!("No UDP echo within 3s"),
    }

    client.close();
    Ok(())
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let result = match args.next().as_deref() {
        Some("server") => run_server(args.next()).await,
        Some("client") => match (args.next(), args.next()) {
            (Some(address), Some(message)) => run_client(address, message).await,
            _ => {
                eprintln!("usage: uniport-echo client <address> <message>");
                std::process::exit(2);
            }
        },
        _ => {
            eprintln!("usage: uniport-echo server [config.toml] | client <address> <message>");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("uniport-echo: {e}");
        std::process::exit(1);
    }
}
