//! # fleet-dispatch — dispatch core process
//!
//! Loads a TOML configuration, starts the queue worker and the health loop,
//! optionally serves the HTTP API, and runs until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a fleet definition
//! fleet-dispatch --config dispatch.toml
//!
//! # Also serve the HTTP API
//! cargo run --features web-api -- --config dispatch.toml --serve
//!
//! # Print the config JSON Schema
//! fleet-dispatch --schema
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (overrides the config file)
//! - `RUST_LOG=info` — log level filter

use std::path::PathBuf;
use std::sync::Arc;

use fleet_dispatch::config::{export_schema, loader};
use fleet_dispatch::{init_tracing, metrics, Coordinator, DispatchConfig};
use tracing::{info, warn};

/// Parsed CLI arguments.
struct Args {
    /// Path to the TOML configuration file.
    config: Option<PathBuf>,
    /// Print the JSON Schema and exit.
    schema: bool,
    /// Serve the HTTP API (requires the `web-api` feature).
    serve: bool,
}

/// Parse command-line arguments manually.
///
/// # Returns
///
/// - `Ok(Args)` on success
/// - `Err(String)` with a usage message on failure
fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut schema = false;
    let mut serve = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a value".to_string());
                }
                config = Some(PathBuf::from(&args[i]));
            }
            "--schema" => schema = true,
            "--serve" => serve = true,
            "--help" | "-h" => return Err(usage()),
            other => return Err(format!("unknown argument: {other}\n{}", usage())),
        }
        i += 1;
    }

    Ok(Args {
        config,
        schema,
        serve,
    })
}

/// Usage text.
fn usage() -> String {
    [
        "Usage: fleet-dispatch [OPTIONS]",
        "",
        "Options:",
        "  --config, -c <FILE>   Path to the TOML configuration (default: built-in defaults)",
        "  --schema              Print the configuration JSON Schema and exit",
        "  --serve               Serve the HTTP API (requires the web-api feature)",
        "  --help, -h            Show this help message",
    ]
    .join("\n")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    if args.schema {
        println!("{}", export_schema()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => loader::load_from_file(path)?,
        None => DispatchConfig::default(),
    };

    // A test harness or embedder may already own the subscriber.
    let _ = init_tracing(config.observability.log_format);
    metrics::init_metrics()?;

    if config.backends.is_empty() {
        warn!("no backends configured; tasks will wait until one is registered");
    }

    let coordinator = Arc::new(Coordinator::new(&config)?);
    coordinator.start();
    info!(
        backends = config.backends.len(),
        strategy = %config.routing.strategy,
        "fleet-dispatch started"
    );

    if args.serve {
        serve(&config, coordinator.clone()).await?;
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C received, shutting down");
    }

    coordinator.shutdown().await;
    let counts = coordinator.get_coordinator_status().task_counts;
    info!(
        completed = counts.completed,
        failed = counts.failed,
        pending = counts.pending,
        "fleet-dispatch stopped"
    );
    Ok(())
}

#[cfg(feature = "web-api")]
async fn serve(
    config: &DispatchConfig,
    coordinator: Arc<Coordinator>,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, shutting down");
    };
    fleet_dispatch::web_api::start_server(config.server.clone(), coordinator, shutdown).await?;
    Ok(())
}

#[cfg(not(feature = "web-api"))]
async fn serve(
    _config: &DispatchConfig,
    _coordinator: Arc<Coordinator>,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("--serve requires the 'web-api' feature".into())
}
