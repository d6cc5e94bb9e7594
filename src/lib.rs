//! Pezzottify Charts Library
//!
//! Popularity charts of the catalog: listen intake, daily aggregation,
//! decay-weighted scoring, chart building and the scheduled jobs driving them.

pub mod background_jobs;
pub mod catalog_store;
pub mod chart_store;
pub mod charts;
pub mod config;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use background_jobs::ChartOrchestrator;
pub use catalog_store::{SqliteTrackCatalog, TrackCatalog};
pub use chart_store::{ChartStore, SqliteChartStore};
pub use charts::{ChartPipeline, ChartQueryService};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
pub use server_store::{ServerStore, SqliteServerStore};
