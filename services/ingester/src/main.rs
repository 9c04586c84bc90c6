//! Photometry ingester service.
//!
//! Receives photometry files, ingests staged batches into the catalog and
//! serves catalog queries over HTTP.

use anyhow::Result;
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ingester::{server, AppState, IngesterConfig};
use storage::{Catalog, MemoryStore, PhotometryStore};

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Photometry upload and ingest service")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep everything in memory instead of PostgreSQL
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus metrics exporter initialized");

    let config = IngesterConfig::from_env()?;
    info!(
        staging_root = %config.staging_root.display(),
        in_memory = args.in_memory,
        "Loaded configuration"
    );

    let store: Arc<dyn PhotometryStore> = if args.in_memory {
        Arc::new(MemoryStore::new())
    } else {
        let catalog = Catalog::connect(&config.database_url).await?;
        catalog.migrate().await?;
        Arc::new(catalog)
    };

    let state = Arc::new(AppState::new(store, &config, Some(prometheus_handle))?);

    let addr: SocketAddr = args.listen.parse()?;
    server::start_server(state, addr).await
}
