use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use super::{admin_routes, chart_routes, http_cache, log_requests, metrics, state::*, ServerConfig};
use crate::background_jobs::ChartOrchestrator;
use crate::catalog_store::TrackCatalog;
use crate::chart_store::ChartStore;
use crate::charts::{ChartPipeline, ChartQueryService};
use crate::server_store::ServerStore;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        chart_store: Arc<dyn ChartStore>,
        catalog: Arc<dyn TrackCatalog>,
        server_store: Arc<dyn ServerStore>,
        pipeline: Arc<ChartPipeline>,
        orchestrator: Arc<ChartOrchestrator>,
    ) -> ServerState {
        let query_service = Arc::new(ChartQueryService::new(chart_store.clone(), server_store));
        ServerState {
            config,
            start_time: Instant::now(),
            chart_store,
            catalog,
            query_service,
            pipeline,
            orchestrator,
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let chart_routes: Router = Router::new()
        .route("/global", get(chart_routes::get_global_chart))
        .route("/country/{code}", get(chart_routes::get_country_chart))
        .route("/trending", get(chart_routes::get_trending))
        .route("/history/{track_id}", get(chart_routes::get_track_history))
        .layer(middleware::from_fn_with_state(
            state.config.content_cache_age_sec,
            http_cache,
        ))
        .route("/stats", get(chart_routes::get_stats))
        .with_state(state.clone());

    let listen_routes: Router = Router::new()
        .route("/", post(chart_routes::post_listen))
        .with_state(state.clone());

    let admin_routes: Router = Router::new()
        .route("/jobs", get(admin_routes::list_jobs))
        .route("/jobs/{name}/history", get(admin_routes::get_job_history))
        .route("/jobs/{name}/audit", get(admin_routes::get_job_audit))
        .route("/jobs/{name}/trigger", post(admin_routes::trigger_job))
        .route("/pipeline/{stage}", post(admin_routes::trigger_pipeline_stage))
        .route(
            "/cache",
            get(admin_routes::get_cache_diagnostics).delete(admin_routes::clear_cache),
        )
        .route(
            "/hooks/catalog-change",
            post(admin_routes::notify_catalog_change),
        )
        .with_state(state.clone());

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/charts", chart_routes)
        .nest("/v1/listens", listen_routes)
        .nest("/v1/admin", admin_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serves the API on `config.port` and Prometheus metrics on `config.metrics_port`.
pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;

    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    Ok(axum::serve(listener, app).await?)
}
