//! Nimbus command line.
//!
//! Drives the offline cache layer from a terminal:
//! - installing (or upgrading to) the configured cache version
//! - dispatching single fetch events through the active worker
//! - listing cache buckets
//! - querying the weather API through the cache
//!
//! ## Usage
//!
//! ```bash
//! # Install the configured version and precache the app shell
//! nimbus --config nimbus.toml install
//!
//! # Fetch a page through the worker
//! nimbus fetch /index.html
//!
//! # Current weather, answered from cache when offline
//! WEATHER_API_KEY=... nimbus weather current London
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nimbus_common::{
    init_logging, retry_if, LogConfig, LogFormat, NimbusError, OptionExt, ResultExt, RetryConfig,
};
use nimbus_core::NimbusConfig;
use nimbus_net::{Fetcher, HttpFetcher, LoaderConfig, Request, Response};
use nimbus_store::{CacheStore, SqliteCacheStore};
use nimbus_sw::{ServiceWorkerContainer, ServiceWorkerEvent};
use nimbus_weather::WeatherClient;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "Offline cache layer for the Nimbus weather dashboard")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "NIMBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Cache database, overrides storage.database
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Tracing filter directives, e.g. "nimbus_sw=trace,reqwest=warn"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured cache version and take control
    Install {
        /// Attempts before giving up
        #[arg(long, default_value = "3")]
        attempts: u32,
    },

    /// Dispatch one fetch event through the active worker
    Fetch {
        /// Absolute URL or path relative to the origin
        url: String,
    },

    /// List cache buckets and their entry counts
    Buckets,

    /// Query the weather API through the cache
    Weather {
        #[command(subcommand)]
        query: WeatherQuery,
    },
}

#[derive(Subcommand)]
enum WeatherQuery {
    /// Current conditions
    Current {
        /// City name, postcode or "lat,lon"
        location: String,
    },
    /// Multi-day forecast
    Forecast {
        location: String,
        /// Days to request (1-14)
        #[arg(short, long)]
        days: Option<u8>,
    },
    /// Location autocomplete
    Search { query: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(log_config(cli.verbose, cli.log_format, cli.log_filter.clone()));

    let config = load_config(cli.config.as_deref(), cli.database)?;

    match cli.command {
        Commands::Install { attempts } => install(&config, attempts).await?,
        Commands::Fetch { url } => fetch(&config, &url).await?,
        Commands::Buckets => buckets(&config).await?,
        Commands::Weather { query } => weather(&config, query).await?,
    }

    Ok(())
}

fn log_config(verbose: u8, format: LogFormat, filter: Option<String>) -> LogConfig {
    let config = match (verbose, format) {
        (0, LogFormat::Json) => LogConfig::production(),
        (0, _) => LogConfig::default(),
        (1, _) => LogConfig::debug(),
        _ => LogConfig::trace(),
    };
    let config = config.with_format(format);
    match filter {
        Some(filter) => config.with_filter(filter),
        None => config,
    }
}

/// Config from `path`, or defaults plus environment overrides.
fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> nimbus_common::Result<NimbusConfig> {
    let mut config = match path {
        Some(path) => NimbusConfig::load(path)?,
        None => {
            let mut config = NimbusConfig::default();
            config.apply_env();
            config.validate()?;
            config
        }
    };
    if let Some(database) = database {
        config.storage.database = database;
    }
    Ok(config)
}

fn open_store(config: &NimbusConfig) -> nimbus_common::Result<Arc<SqliteCacheStore>> {
    let path = &config.storage.database;
    debug!(path = %path.display(), "Opening cache database");
    let store = SqliteCacheStore::open(path)
        .context(format!("opening cache database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn network(config: &NimbusConfig) -> nimbus_common::Result<Arc<HttpFetcher>> {
    let loader = LoaderConfig::new(config.origin_url()?)
        .user_agent(config.network.user_agent.clone())
        .timeout(Duration::from_secs(config.network.timeout_secs))
        .max_redirects(config.network.max_redirects);
    Ok(Arc::new(HttpFetcher::new(loader)?))
}

fn container(
    config: &NimbusConfig,
) -> nimbus_common::Result<(
    Arc<ServiceWorkerContainer>,
    UnboundedReceiver<ServiceWorkerEvent>,
)> {
    let (container, events) = ServiceWorkerContainer::new(open_store(config)?, network(config)?);
    Ok((Arc::new(container), events))
}

/// Container with the stored version in control.
async fn resumed(
    config: &NimbusConfig,
) -> nimbus_common::Result<(
    Arc<ServiceWorkerContainer>,
    UnboundedReceiver<ServiceWorkerEvent>,
)> {
    let (container, events) = container(config)?;
    container.resume(config).await?;
    Ok((container, events))
}

async fn install(config: &NimbusConfig, attempts: u32) -> anyhow::Result<()> {
    let (container, mut events) = container(config)?;
    let retry = RetryConfig::attempts(attempts);

    let target = &container;
    let worker = retry_if(
        &retry,
        move || async move { target.register(config).await.map_err(NimbusError::from) },
        NimbusError::is_retryable,
    )
    .await?;

    report_events(&mut events);
    println!("{} active (version {})", worker, config.cache.version);
    let names = container.buckets().await.ok_or_not_found("active cache version")?;
    let cached = container.store().len(&names.static_name).await?;
    println!("{}: {} entries precached", names.static_name, cached);
    Ok(())
}

async fn fetch(config: &NimbusConfig, url: &str) -> anyhow::Result<()> {
    let url = config.origin_url()?.join(url)?;
    let (container, mut events) = resumed(config).await?;

    let request = Request::get(url.clone());
    let response = match container.handle_fetch(request.clone()).await {
        Some(result) => result?,
        None => container.fetch(&request).await?,
    };
    print_response(&response);

    container.settle().await;
    report_events(&mut events);
    Ok(())
}

async fn buckets(config: &NimbusConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let names = store.bucket_names().await?;
    if names.is_empty() {
        println!("no buckets");
    }
    for name in names {
        let entries = store.len(&name).await?;
        println!("{:<32} {:>5} entries", name, entries);
    }
    Ok(())
}

async fn weather(config: &NimbusConfig, query: WeatherQuery) -> anyhow::Result<()> {
    let (container, mut events) = resumed(config).await?;
    let client = WeatherClient::from_config(config, container.clone()).map_err(NimbusError::from)?;

    let json = match query {
        WeatherQuery::Current { location } => {
            let data = client.current(&location).await.map_err(NimbusError::from)?;
            serde_json::to_string_pretty(&data)?
        }
        WeatherQuery::Forecast { location, days } => {
            let client = match days {
                Some(days) => client.forecast_days(days),
                None => client,
            };
            let data = client.forecast(&location).await.map_err(NimbusError::from)?;
            serde_json::to_string_pretty(&data)?
        }
        WeatherQuery::Search { query } => {
            let results = client.search(&query).await.map_err(NimbusError::from)?;
            serde_json::to_string_pretty(&results)?
        }
    };
    println!("{}", json);

    container.settle().await;
    report_events(&mut events);
    Ok(())
}

fn print_response(response: &Response) {
    let source = if response.from_cache { "cache" } else { "network" };
    println!(
        "{} {} ({}, {}, {} bytes)",
        response.status,
        response.url,
        source,
        response.response_type.as_str(),
        response.body_len()
    );
}

fn report_events(events: &mut UnboundedReceiver<ServiceWorkerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ServiceWorkerEvent::BucketDeleted { bucket } => info!(%bucket, "Deleted stale bucket"),
            ServiceWorkerEvent::Evicted { bucket, key } => info!(%bucket, %key, "Evicted"),
            other => debug!(event = ?other, "Service worker event"),
        }
    }
}
