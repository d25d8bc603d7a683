//! measures-repeater: replays a canned LiDAR measures dump over TCP
//!
//! Every client that connects receives the full content of the measures
//! file, then the same bytes again after each interval, until it hangs up.
//! Downstream consumers can be developed against it without a scanner.
//!
//! Features:
//! - One task per client, shared immutable payload
//! - Connection limit and Ctrl+C shutdown
//! - Configuration via CLI arguments or TOML file

mod config;
mod measures;
mod server;
mod session;

use config::Config;
use server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (server, listener) = Server::start(&config)?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
