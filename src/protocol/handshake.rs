//! Connection handshake.
//!
//! Runs once per TCP connection, after the client has sent the protocol magic
//! and before any packet traffic. The default exchange is:
//!
//! ```text
//! server -> client:  [RandomId: u32] [ServerName: str] [Motd: str]
//! client -> server:  [Name: str] [Uuid: str]
//! ```
//!
//! Strings use the `u16` length prefix from [`crate::core::stream`]. Protocols
//! may replace the exchange with their own [`Handshake`]; returning `Ok(false)`
//! rejects the connection.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[allow(unused_imports)]
use tracing::{debug, instrument, warn};

use crate::client::TcpClient;
use crate::core::stream::{read_string, write_string, PacketInput, PacketOutput};
use crate::error::{constants, ProtocolError, Result};
use crate::server::Server;

/// Per-protocol handshake logic.
///
/// Both sides default to the exchange documented at module level.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    /// Server side. `client.random_id()` is already assigned.
    async fn server_handshake(&self, server: &Server, client: &TcpClient) -> Result<bool> {
        default_server_handshake(server, client).await
    }

    /// Client side. Must store the random id assigned by the server.
    async fn client_handshake(&self, client: &TcpClient) -> Result<bool> {
        default_client_handshake(client).await
    }
}

/// The stock exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandshake;

impl Handshake for DefaultHandshake {}

/// First handshake message, sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub random_id: u32,
    pub server_name: String,
    pub motd: String,
}

impl ServerHello {
    pub async fn write_to(&self, out: &mut PacketOutput<'_>) -> Result<()> {
        out.write_u32(self.random_id).await?;
        write_string(out, &self.server_name).await?;
        write_string(out, &self.motd).await?;
        Ok(())
    }

    pub async fn read_from(input: &mut PacketInput<'_>) -> Result<Self> {
        let random_id = input.read_u32().await?;
        let server_name = read_string(input).await?;
        let motd = read_string(input).await?;
        Ok(Self {
            random_id,
            server_name,
            motd,
        })
    }
}

/// Second handshake message, sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub name: String,
    pub uuid: String,
}

impl ClientHello {
    pub async fn write_to(&self, out: &mut PacketOutput<'_>) -> Result<()> {
        write_string(out, &self.name).await?;
        write_string(out, &self.uuid).await?;
        Ok(())
    }

    pub async fn read_from(input: &mut PacketInput<'_>) -> Result<Self> {
        let name = read_string(input).await?;
        let uuid = read_string(input).await?;
        Ok(Self { name, uuid })
    }
}

#[instrument(skip_all, fields(peer = %client.peer_addr()), level = "debug")]
pub async fn default_server_handshake(server: &Server, client: &TcpClient) -> Result<bool> {
    let hello = ServerHello {
        random_id: client.random_id(),
        server_name: server.config().name.clone(),
        motd: server.config().motd.clone(),
    };

    {
        let mut writer = client.lock_writer().await?;
        hello.write_to(&mut *writer).await?;
        writer.flush().await?;
    }

    let reply = {
        let mut reader = client.lock_reader().await?;
        ClientHello::read_from(&mut *reader).await?
    };

    debug!(name = %reply.name, uuid = %reply.uuid, "Client identified");
    client.set_identity(reply.name, reply.uuid);
    Ok(true)
}

#[instrument(skip_all, fields(peer = %client.peer_addr()), level = "debug")]
pub async fn default_client_handshake(client: &TcpClient) -> Result<bool> {
    let hello = {
        let mut reader = client.lock_reader().await?;
        ServerHello::read_from(&mut *reader).await?
    };

    if hello.random_id == 0 {
        warn!("Server assigned random id 0");
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_ZERO_ID.to_string(),
        ));
    }

    client.set_random_id(hello.random_id);
    client.set_server_info(hello.server_name, hello.motd);

    let reply = ClientHello {
        name: client.name(),
        uuid: client.uuid(),
    };
    let mut writer = client.lock_writer().await?;
    reply.write_to(&mut *writer).await?;
    writer.flush().await?;

    debug!(random_id = hello.random_id, "Handshake complete");
    Ok(true)
}
