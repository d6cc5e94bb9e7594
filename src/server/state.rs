use axum::extract::FromRef;

use crate::background_jobs::ChartOrchestrator;
use crate::catalog_store::TrackCatalog;
use crate::chart_store::ChartStore;
use crate::charts::{ChartPipeline, ChartQueryService};
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedChartStore = Arc<dyn ChartStore>;
pub type GuardedTrackCatalog = Arc<dyn TrackCatalog>;
pub type GuardedQueryService = Arc<ChartQueryService>;
pub type GuardedPipeline = Arc<ChartPipeline>;
pub type GuardedOrchestrator = Arc<ChartOrchestrator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub chart_store: GuardedChartStore,
    pub catalog: GuardedTrackCatalog,
    pub query_service: GuardedQueryService,
    pub pipeline: GuardedPipeline,
    pub orchestrator: GuardedOrchestrator,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedChartStore {
    fn from_ref(input: &ServerState) -> Self {
        input.chart_store.clone()
    }
}

impl FromRef<ServerState> for GuardedTrackCatalog {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog.clone()
    }
}

impl FromRef<ServerState> for GuardedQueryService {
    fn from_ref(input: &ServerState) -> Self {
        input.query_service.clone()
    }
}

impl FromRef<ServerState> for GuardedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for GuardedOrchestrator {
    fn from_ref(input: &ServerState) -> Self {
        input.orchestrator.clone()
    }
}
