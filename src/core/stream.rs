//! # Stream Adapters
//!
//! Byte-channel wrappers the packet layer reads from and writes to.
//!
//! ## Components
//! - **Connection halves**: buffered read/write halves of a TCP socket. Reads
//!   suspend until the requested bytes arrive, writes accumulate until flushed.
//! - **FixedBuffer**: capacity-bounded in-memory sink used to assemble a single
//!   UDP datagram. Writing past the capacity fails instead of growing.
//! - **Strings**: `u16` big-endian byte length followed by UTF-8 bytes.
//!
//! Packets only ever see `dyn AsyncRead`/`dyn AsyncWrite`, so the same encode
//! and decode code runs against a socket, a datagram slice or a test buffer.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{ProtocolError, Result};

/// Input stream handed to packet decoders.
pub type PacketInput<'a> = dyn AsyncRead + Unpin + Send + 'a;

/// Output stream handed to packet encoders.
pub type PacketOutput<'a> = dyn AsyncWrite + Unpin + Send + 'a;

/// Buffered read half of a connection.
pub type ConnectionReader = BufReader<OwnedReadHalf>;

/// Buffered write half of a connection.
pub type ConnectionWriter = BufWriter<OwnedWriteHalf>;

/// Read/write buffer size per connection half
pub const STREAM_BUFFER_SIZE: usize = 16 * 1024;

/// Largest UDP payload that fits an IPv4 datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Split a socket into buffered halves.
pub fn split_stream(stream: TcpStream) -> (ConnectionReader, ConnectionWriter) {
    let (read, write) = stream.into_split();
    (
        BufReader::with_capacity(STREAM_BUFFER_SIZE, read),
        BufWriter::with_capacity(STREAM_BUFFER_SIZE, write),
    )
}

/// Write a length-prefixed UTF-8 string.
pub async fn write_string(out: &mut PacketOutput<'_>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong(value.len()))?;
    out.write_u16(len).await?;
    out.write_all(value.as_bytes()).await?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
pub async fn read_string(input: &mut PacketInput<'_>) -> Result<String> {
    let len = input.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Capacity-bounded write buffer for building datagrams.
///
/// The buffer is reused between datagrams via [`FixedBuffer::reset`]; its
/// allocation never grows past the capacity given at construction.
#[derive(Debug)]
pub struct FixedBuffer {
    buf: BytesMut,
    capacity: usize,
    overflowed: bool,
}

impl FixedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    /// A buffer sized for the largest possible datagram.
    pub fn datagram() -> Self {
        Self::new(MAX_DATAGRAM_SIZE)
    }

    /// Discard the contents, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a write was refused since the last reset.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Map an encode failure to `OversizedDatagram` when it was caused by
    /// running out of room.
    pub fn classify(&self, err: ProtocolError) -> ProtocolError {
        if self.overflowed {
            ProtocolError::OversizedDatagram(self.capacity)
        } else {
            err
        }
    }
}

impl AsyncWrite for FixedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.buf.len() + data.len() > this.capacity {
            this.overflowed = true;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram capacity exceeded",
            )));
        }
        this.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
