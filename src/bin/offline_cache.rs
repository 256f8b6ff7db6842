//! Offline cache daemon.
//!
//! Installs and activates the configured generation, then serves the local
//! interception endpoint until interrupted.
//!
//! Usage:
//! ```
//! cargo run --bin offline_cache -- --config ./offline.json --port 9191
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use offline_cache::api::Interceptor;
use offline_cache::config::OfflineConfig;
use offline_cache::lifecycle::LifecycleManager;
use offline_cache::network::HttpFetcher;
use offline_cache::storage::{ResponseStore, StructuredStore};
use offline_cache::{logging, proxy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    let mut config = match &args.config {
        Some(path) => OfflineConfig::from_path(path)?,
        None => OfflineConfig::default(),
    };
    if let Some(path) = args.storage_path {
        config.storage_path = path;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    let log_dir = config.storage_path.join("logs");
    logging::init_logging(Some(log_dir.as_path()))?;
    tracing::info!("Starting offline_cache v{}", offline_cache::VERSION);

    let responses = Arc::new(
        ResponseStore::new(&config.storage_path).context("opening response store")?,
    );
    let structured = Arc::new(
        StructuredStore::new(&config.storage_path).context("opening structured store")?,
    );
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);

    let lifecycle = LifecycleManager::new(
        config.generation_name(),
        config.manifest_urls()?,
        Arc::clone(&responses),
        fetcher.clone(),
    );
    // A failed install leaves the previous generation serving.
    if let Err(e) = lifecycle.start().await {
        tracing::error!(
            "Generation {} not activated: {}",
            lifecycle.generation_name(),
            e
        );
    }

    let interceptor = Arc::new(Interceptor::new(&config, responses, structured, fetcher)?);
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    let addr = format!("{}:{}", config.bind_address, config.port);
    proxy::bind_and_run(Arc::clone(&interceptor), &addr, running).await?;

    interceptor.shutdown().await;
    let status = interceptor.status().await;
    tracing::info!(
        "Served {} requests ({} degraded)",
        status.bypass + status.network_first_structured + status.cache_first + status.opportunistic,
        status.degraded
    );
    Ok(())
}

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    storage_path: Option<PathBuf>,
    port: Option<u16>,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = args.next() {
                    parsed.config = Some(PathBuf::from(path));
                }
            }
            "--storage-path" => {
                if let Some(path) = args.next() {
                    parsed.storage_path = Some(PathBuf::from(path));
                }
            }
            "--port" => match args.next().map(|p| p.parse::<u16>()) {
                Some(Ok(port)) => parsed.port = Some(port),
                Some(Err(e)) => eprintln!("Invalid --port: {e}"),
                None => eprintln!("--port needs a value"),
            },
            "--help" | "-h" => {
                eprintln!("Offline cache daemon");
                eprintln!();
                eprintln!("Usage: offline_cache [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --config <PATH>         JSON config file (defaults apply when omitted)");
                eprintln!("  --storage-path <PATH>   Directory for stores and logs (default: ./offline_cache_data)");
                eprintln!("  --port <PORT>           Interception endpoint port (default: 9191)");
                eprintln!("  --help, -h              Show this help");
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {arg}");
            }
        }
    }

    parsed
}
