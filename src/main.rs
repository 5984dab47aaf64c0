//! Plugin entry point.
//!
//! Discovers resource types from the Skiff server named by the environment
//! (the server must be reachable at schema-discovery time), then serves the
//! plugin protocol until the host engine shuts it down.

use std::net::SocketAddr;

use clap::Parser;

use skiff_provider::{serve, serve_on, DynamicProvider, ProviderConfig};

/// Provider plugin for a running Skiff server.
#[derive(Parser, Debug)]
#[command(name = "skiff-provider", version, about, long_about = None)]
struct Args {
    /// Listen on a fixed address instead of an ephemeral port (useful when
    /// attaching a debugger to the plugin process)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Fallback log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    skiff_provider::init_logging_with_default(&args.log_level);

    let config = ProviderConfig::from_env();
    let store = config.open_store()?;

    let provider = match DynamicProvider::discover(env!("CARGO_PKG_VERSION"), &store).await {
        Ok(provider) => provider,
        Err(err) => {
            tracing::error!(
                endpoint = %config.endpoint,
                error = %err,
                "resource discovery failed; no resources will be available"
            );
            DynamicProvider::new(env!("CARGO_PKG_VERSION"), Vec::new())
        }
    };

    match args.listen {
        Some(addr) => serve_on(provider, addr).await,
        None => serve(provider).await,
    }
}
