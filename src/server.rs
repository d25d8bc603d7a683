//! TCP server for the measures repeater.
//!
//! Accepts connections and runs one repeat session per client on its own
//! task, so a client stuck in its send/sleep cycle never blocks the accept
//! loop.

use crate::config::Config;
use crate::measures::Measures;
use crate::session;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Pending connection queue length passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 128;

/// Pause after the first failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Upper bound for the accept backoff.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server instance
pub struct Server {
    measures: Measures,
    interval: Duration,
    max_connections: usize,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config, measures: Measures) -> Self {
        Server {
            measures,
            interval: config.interval,
            max_connections: config.max_connections,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    /// Load the measures file, then bind the configured address.
    ///
    /// The payload is read first so that a bad file never leaves a bound
    /// listener behind.
    pub fn start(config: &Config) -> Result<(Self, TcpListener), Box<dyn std::error::Error>> {
        let measures = Measures::load(&config.measures)?;

        info!(
            listen = %config.listen,
            measures = %config.measures.display(),
            bytes = measures.len(),
            interval_ms = config.interval.as_millis() as u64,
            max_connections = config.max_connections,
            "Starting measures-repeater"
        );

        let listener = Self::bind(config.listen)?;
        Ok((Self::new(config, measures), listener))
    }

    /// Bind a listening socket on `addr`.
    ///
    /// `SO_REUSEADDR` lets a restart reuse a port with connections in
    /// TIME_WAIT; binding over a live listener still fails.
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        TcpListener::from_std(socket.into())
    }

    /// Number of sessions currently holding a connection slot.
    pub fn active_sessions(&self) -> usize {
        self.max_connections - self.connection_limit.available_permits()
    }

    /// Accept connections on `listener` until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(address = %local, "Server listening");

        tokio::pin!(shutdown);
        let mut accept_failures = 0u32;

        loop {
            let (stream, addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(active = self.active_sessions(), "Shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // EMFILE and friends fail again at once until something closes
                        let backoff = accept_backoff(accept_failures);
                        accept_failures = accept_failures.saturating_add(1);
                        warn!(
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "Failed to accept connection"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                },
            };
            accept_failures = 0;

            let permit = match self.connection_limit.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(peer = %addr, limit = self.max_connections, "Connection limit reached");
                    drop(stream);
                    continue;
                }
            };

            debug!(peer = %addr, "New connection");

            let measures = self.measures.clone();
            let interval = self.interval;

            tokio::spawn(async move {
                handle_connection(stream, addr, measures, interval).await;
                drop(permit);
            });
        }
    }
}

/// Delay before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_MIN
        .checked_mul(1u32.checked_shl(failures).unwrap_or(u32::MAX))
        .map_or(ACCEPT_BACKOFF_MAX, |d| d.min(ACCEPT_BACKOFF_MAX))
}

/// Run one session and log how it ended.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    measures: Measures,
    interval: Duration,
) {
    match session::repeat(&mut stream, &measures, interval).await {
        Ok(end) => info!(peer = %addr, sends = end.sends, "Session finished, peer disconnected"),
        Err(e) => warn!(peer = %addr, error = %e, "Session failed"),
    }
}
