//! tcpmux: a TCPMUX (RFC 1078) service multiplexer
//!
//! Clients connect to a single well-known port and name the service they
//! want. The server then relays the connection to:
//! - a remote TCP endpoint (`NET` services)
//! - the stdin/stdout of a freshly spawned local program (`LOCAL` services)
//!
//! `HELP` lists the configured services.

mod config;
mod directory;
mod platform;
mod protocol;
mod server;
mod service;

use clap::Parser;
use config::{CliArgs, Config, ConfigFile};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let cli = CliArgs::parse();
    let file = ConfigFile::read(&cli.config)?;

    // Initialize logging
    let log_level = Config::log_level(&cli, &file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::resolve(cli, file);

    info!(
        listen = %config.listen,
        services = config.directory.len(),
        workers = ?config.workers,
        version = env!("CARGO_PKG_VERSION"),
        "Starting tcpmux"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    let server = Server::new(config.listen, config.directory);
    runtime.block_on(server.run())?;
    Ok(())
}
