#![cfg(not(tarpaulin_include))]

use log::error;
use rerc_portal::{app, config::Config};

/// Main entry point for the review portal server
///
/// Initializes logging from `RUST_LOG` (default `info`), reads the
/// configuration from the environment and runs the HTTP server.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load().inspect_err(|e| error!("Configuration error: {e}"))?;

    app::run(config).await
}
