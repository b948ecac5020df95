//! Timeout helpers shared by the handshake, connect and queueing paths.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default deadline for connecting, reading the protocol magic and the handshake
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default idle time before a keepalive ping is queued
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound between queue-space rechecks while a sender waits
pub const QUEUE_RECHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Run `fut` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
