//! sticker-responder: a scripted sticker delivery server
//!
//! Stands in for the delivery robot in front of a single pump client:
//! - Accepts exactly one TCP connection
//! - Answers `deliver a new sticker` with a timed three-step reply sequence
//! - Acknowledges `wait until next sticker`, logs anything else
//! - Stops cleanly on Ctrl-C or when the client disconnects
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod server;
mod sticker;

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

    info!(
        listen = %config.listen,
        max_line = config.max_line,
        "Starting sticker-responder"
    );

    // One client, one task: a current-thread runtime is all this needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(&config).await?;

    let end = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(reason = ?end, "Server exiting");
    Ok(())
}
