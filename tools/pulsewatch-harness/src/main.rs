//! Command line harness for the Pulsewatch offline subsystem.
//!
//! Drives the cache manager against a live origin over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Print the effective configuration
//! pulsewatch-harness check-config --config offline.json
//!
//! # Precache the app shell from a running dev server
//! pulsewatch-harness precache --origin http://localhost:8080/
//!
//! # Fetch paths twice through an active worker and report hits
//! pulsewatch-harness fetch --origin http://localhost:8080/ /index.html /api/readings
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulsewatch_common::{init_logging, LogConfig, LogFormat};
use pulsewatch_core::OfflineConfig;
use pulsewatch_net::{HttpFetcher, LoaderConfig, Request};
use pulsewatch_sw::{
    CacheStore, Clients, FetchEvent, MemoryCacheStore, ResponseSource, ServiceWorkerContainer,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

#[derive(Parser)]
#[command(name = "pulsewatch-harness")]
#[command(about = "Command line harness for the Pulsewatch offline subsystem")]
struct Cli {
    /// Offline config file (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, validate and print the effective configuration
    CheckConfig,

    /// Install a worker against a live origin and list its bucket
    Precache {
        /// Origin serving the app shell
        #[arg(short, long)]
        origin: Url,
    },

    /// Install and activate, then fetch every path twice
    Fetch {
        /// Origin serving the app shell
        #[arg(short, long)]
        origin: Url,
        /// Origin-relative paths to request
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct BucketEntry {
    url: String,
    status: u16,
    bytes: usize,
}

#[derive(Debug, Serialize)]
struct BucketReport {
    cache: String,
    entries: Vec<BucketEntry>,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    path: String,
    status: u16,
    first: ResponseSource,
    second: ResponseSource,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().with_format(cli.log_format);
    if let Some(filter) = cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config).context("failed to initialize logging")?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::CheckConfig => {
            print_json(&config)?;
        }

        Commands::Precache { origin } => {
            let report = precache(with_origin(config, &origin)?).await?;
            print_json(&report)?;
        }

        Commands::Fetch { origin, paths } => {
            let report = fetch(with_origin(config, &origin)?, &origin, &paths).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<OfflineConfig> {
    match path {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(OfflineConfig::default()),
    }
}

fn with_origin(mut config: OfflineConfig, origin: &Url) -> Result<OfflineConfig> {
    config.origin = origin.to_string();
    config.validate().context("invalid origin")?;
    Ok(config)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn http_fetcher() -> Result<Arc<HttpFetcher>> {
    Ok(Arc::new(
        HttpFetcher::new(LoaderConfig::default()).context("failed to build HTTP client")?,
    ))
}

async fn precache(config: OfflineConfig) -> Result<BucketReport> {
    let store = Arc::new(MemoryCacheStore::new());
    let worker = pulsewatch_sw::CacheManager::new(
        config,
        store.clone(),
        http_fetcher()?,
        Arc::new(RwLock::new(Clients::new())),
    )?;

    worker.install().await.context("precache failed")?;

    let cache = worker.cache_name().to_string();
    let mut entries = Vec::new();
    for key in store.keys(&cache).await? {
        if let Some(entry) = store.match_entry(&cache, &key).await? {
            entries.push(BucketEntry {
                url: entry.url.to_string(),
                status: entry.status,
                bytes: entry.body.len(),
            });
        }
    }
    entries.sort_by(|a, b| a.url.cmp(&b.url));
    info!(cache = %cache, entries = entries.len(), "Precache complete");

    Ok(BucketReport { cache, entries })
}

async fn fetch(config: OfflineConfig, origin: &Url, paths: &[String]) -> Result<Vec<FetchReport>> {
    let script = config.worker_script.clone();
    let (container, _events) =
        ServiceWorkerContainer::new(Arc::new(MemoryCacheStore::new()), http_fetcher()?);
    container.deploy(&script, config).await?;
    let registration = container
        .register_script(&script)
        .await
        .context("worker registration failed")?;
    info!(scope = %registration.scope, cache = %registration.cache_name, "Worker active");

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let url = origin
            .join(path)
            .with_context(|| format!("invalid path {path}"))?;

        let first = container
            .handle_fetch(FetchEvent::new(Request::get(url.clone())))
            .await
            .with_context(|| format!("fetch {path}"))?;
        let second = container
            .handle_fetch(FetchEvent::new(Request::get(url)))
            .await
            .with_context(|| format!("fetch {path}"))?;

        reports.push(FetchReport {
            path: path.clone(),
            status: second.response.status.as_u16(),
            first: first.source,
            second: second.source,
        });
    }

    Ok(reports)
}
