//! resource-scanner - A rate-limited, retrying client for paginated resource APIs
//!
//! This is the command-line entry point. Results are printed as JSON on
//! stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use resource_scanner::config::Config;
use resource_scanner::telemetry::init_tracing;
use resource_scanner::ResourceScanner;

/// resource-scanner - A rate-limited, retrying client for paginated resource APIs
#[derive(Parser, Debug)]
#[command(name = "resource-scanner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "RESOURCE_SCANNER_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether the API reports itself healthy
    Health,
    /// Fetch one page of the resource listing
    List {
        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Resources per page
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Fetch a single resource
    Get {
        /// Resource identifier
        id: String,
    },
    /// Scan every configured collection
    Scan {
        /// Print only resources holding sensitive data
        #[arg(long)]
        sensitive: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.client.base_url,
        "Starting resource-scanner"
    );

    let scanner = ResourceScanner::new(&config)?;

    match args.command {
        Command::Health => {
            let healthy = scanner.check_health().await;
            print_json(&serde_json::json!({ "healthy": healthy }))?;
            if !healthy {
                anyhow::bail!("service is not healthy");
            }
        }
        Command::List { page, limit } => {
            let page = scanner.list_resources(page, limit).await?;
            print_json(&page)?;
        }
        Command::Get { id } => {
            let resource = scanner.get_resource(&id).await?;
            print_json(&resource)?;
        }
        Command::Scan { sensitive } => {
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_shutdown(cancel.clone()));

            let result = scanner.scan_all_with_cancel(cancel).await;
            watcher.abort();

            if sensitive {
                print_json(&ResourceScanner::sensitive_resources(&result))?;
            } else {
                print_json(&result)?;
            }

            for (name, error) in result.failures() {
                warn!(descriptor = %name, error = %error, "Descriptor failed");
            }
        }
    }

    info!("resource-scanner finished");
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel the scan when a shutdown signal is received
async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling scan");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling scan");
        }
    }

    cancel.cancel();
}
