//! Gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ rate limiter ──▶ routing ──▶ circuit breaker
//!                                      (scopes)      (prefix)     (per service)
//!                                                                      │
//!                                                                      ▼
//!     Client Response                                          service discovery
//!     ◀────────────── upstream response ◀── instance ◀──────── + load balancer
//!                     (outcome → breaker)
//!
//!     Background: limiter idle sweep, registry TTL reaper, admin API
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_admission::config::{load_config, GatewayConfig};
use gateway_admission::observability::{logging, metrics};
use gateway_admission::HttpServer;

#[derive(Parser)]
#[command(name = "gateway", version, about = "Traffic-admission gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        routes = config.routes.len(),
        seeded_instances = config.registry.instances.len(),
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
