use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_charts::config;
use pezzottify_charts::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use pezzottify_charts::{
    ChartOrchestrator, ChartPipeline, SqliteChartStore, SqliteServerStore, SqliteTrackCatalog,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the database files (charts.db, catalog.db, server.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The maximum age of chart responses in client caches, in seconds.
    #[clap(long, default_value_t = 300)]
    pub content_cache_age_sec: usize,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            content_cache_age_sec: args.content_cache_age_sec,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!("  page size: {}", app_config.charts.page_size);

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening chart store at {:?}", app_config.charts_db_path());
    let chart_store = Arc::new(SqliteChartStore::new(app_config.charts_db_path())?);
    info!("Opening track catalog at {:?}", app_config.catalog_db_path());
    let catalog = Arc::new(SqliteTrackCatalog::new(app_config.catalog_db_path())?);
    info!(
        "Initializing server store at {:?}",
        app_config.server_db_path()
    );
    let server_store = Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let pipeline = Arc::new(ChartPipeline::new(
        chart_store.clone(),
        catalog.clone(),
        server_store.clone(),
        app_config.charts.clone(),
        app_config.background_jobs.chart_update_interval_mins as i64 * 60,
    ));

    let orchestrator = Arc::new(
        ChartOrchestrator::new(
            pipeline.clone(),
            server_store.clone(),
            &app_config.background_jobs,
        )
        .await,
    );
    orchestrator.start().await;

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        metrics_port: app_config.metrics_port,
        content_cache_age_sec: app_config.content_cache_age_sec,
    };
    let state = ServerState::new(
        server_config,
        chart_store,
        catalog,
        server_store,
        pipeline,
        orchestrator.clone(),
    );

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let result = tokio::select! {
        result = run_server(state) => {
            if let Err(e) = &result {
                error!("HTTP server stopped: {:#}", e);
            }
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    // In-flight pipeline runs finish before the process exits
    orchestrator.stop().await;
    result
}
