//! Per-connection repeat loop.
//!
//! A session writes the whole measures payload, sleeps for the configured
//! interval and starts again. The only normal way out is a failed write
//! caused by the peer going away:
//!
//! ```text
//! ACCEPTED -> SENDING <-> SLEEPING
//!                |
//!                +-- reset / broken pipe --> CLOSED
//! ```

use crate::measures::Measures;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Outcome of a session closed by its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    /// Number of complete payload sends.
    pub sends: u64,
}

/// Whether a write error means the remote end closed the connection.
pub fn is_peer_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
    )
}

/// Send `measures` to `writer` every `interval` until the peer disconnects.
///
/// A disconnect ends the session with `Ok`. Any other I/O error is returned
/// as is.
pub async fn repeat<W>(
    writer: &mut W,
    measures: &Measures,
    interval: Duration,
) -> io::Result<SessionEnd>
where
    W: AsyncWrite + Unpin,
{
    let mut sends = 0u64;

    loop {
        match writer.write_all(measures.as_bytes()).await {
            Ok(()) => {
                sends += 1;
                trace!(sends, bytes = measures.len(), "Sent measures");
            }
            Err(e) if is_peer_disconnect(&e) => return Ok(SessionEnd { sends }),
            Err(e) => return Err(e),
        }

        tokio::time::sleep(interval).await;
    }
}
