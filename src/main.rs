//! Standalone HTTP forwarder.
//!
//! Forwards every inbound request to the configured base origin(s).

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use http_forwarder::config::loader::load_config;
use http_forwarder::observability::{logging, metrics};
use http_forwarder::{ForwardServer, Shutdown};

#[derive(Parser)]
#[command(name = "http-forwarder")]
#[command(about = "Forward HTTP requests to upstream origins", long_about = None)]
struct Cli {
    /// Path to the TOML configuration.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-forwarder starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                address = %config.observability.metrics_address,
                "Invalid metrics address, metrics disabled"
            ),
        }
    }

    let server = ForwardServer::from_config(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();
    server.run(listener, shutdown.signal()).await?;

    Ok(())
}
