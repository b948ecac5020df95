//! Built-in keepalive packet.
//!
//! Every protocol registers [`Ping`] automatically. It is queued whenever a
//! connection has been idle for its ping delay and carries the sender's wall
//! clock so the receiver can estimate the offset between the two clocks.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::core::signature::Signature;
use crate::core::stream::{PacketInput, PacketOutput};
use crate::error::Result;
use crate::protocol::packet::{Packet, PacketContext};
use crate::utils::time::current_millis;

/// Wire identifier of the keepalive packet.
pub const PING_MAGIC: Signature = Signature::from_tag("PING");

/// Keepalive carrying the sender's Unix time in milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ping {
    last_remote_millis: i64,
}

impl Ping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote timestamp carried by the last ping this instance received.
    pub fn last_remote_millis(&self) -> i64 {
        self.last_remote_millis
    }
}

#[async_trait]
impl Packet for Ping {
    fn magic(&self) -> Signature {
        PING_MAGIC
    }

    fn can_drop(&self) -> bool {
        true
    }

    async fn send(&self, _ctx: &PacketContext<'_>, out: &mut PacketOutput<'_>) -> Result<()> {
        out.write_i64(current_millis()).await?;
        Ok(())
    }

    async fn receive(&mut self, ctx: &PacketContext<'_>, input: &mut PacketInput<'_>) -> Result<()> {
        let remote = input.read_i64().await?;
        self.last_remote_millis = remote;
        ctx.client.record_ping(remote);
        trace!(peer = %ctx.client.peer_addr(), remote_millis = remote, "Ping received");
        Ok(())
    }
}
