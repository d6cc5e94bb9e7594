//! Shared fixture for the end-to-end tests: real SQLite stores in a temp dir
//! behind the axum app, driven in-process with `oneshot`.

#![allow(dead_code)]

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use pezzottify_charts::catalog_store::NewTrack;
use pezzottify_charts::config::{BackgroundJobsSettings, ChartsSettings};
use pezzottify_charts::{
    make_app, ChartOrchestrator, ChartPipeline, ServerConfig, ServerState, SqliteChartStore,
    SqliteServerStore, SqliteTrackCatalog,
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TRACK_1_ID: &str = "track-1";
pub const TRACK_2_ID: &str = "track-2";
pub const TRACK_3_ID: &str = "track-3";
pub const TRACK_DURATION_SECS: u32 = 200;

pub struct TestApp {
    pub router: Router,
    pub chart_store: Arc<SqliteChartStore>,
    pub catalog: Arc<SqliteTrackCatalog>,
    pub server_store: Arc<SqliteServerStore>,
    pub orchestrator: Arc<ChartOrchestrator>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(ChartsSettings::default()).await
    }

    pub async fn with_settings(settings: ChartsSettings) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let chart_store =
            Arc::new(SqliteChartStore::new(temp_dir.path().join("charts.db")).unwrap());
        let catalog =
            Arc::new(SqliteTrackCatalog::new(temp_dir.path().join("catalog.db")).unwrap());
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());

        catalog.insert_artist("artist-1", "The Testers").unwrap();
        for (id, name) in [
            (TRACK_1_ID, "Track One"),
            (TRACK_2_ID, "Track Two"),
            (TRACK_3_ID, "Track Three"),
        ] {
            catalog
                .insert_track(&NewTrack {
                    id: id.to_string(),
                    name: name.to_string(),
                    artist_id: "artist-1".to_string(),
                    genre: Some("rock".to_string()),
                    duration_secs: TRACK_DURATION_SECS,
                    chart_eligible: true,
                })
                .unwrap();
        }

        let pipeline = Arc::new(ChartPipeline::new(
            chart_store.clone(),
            catalog.clone(),
            server_store.clone(),
            settings,
            15 * 60,
        ));
        let orchestrator = Arc::new(
            ChartOrchestrator::new(
                pipeline.clone(),
                server_store.clone(),
                &BackgroundJobsSettings::default(),
            )
            .await,
        );
        let state = ServerState::new(
            ServerConfig::default(),
            chart_store.clone(),
            catalog.clone(),
            server_store.clone(),
            pipeline,
            orchestrator.clone(),
        );

        Self {
            router: make_app(state),
            chart_store,
            catalog,
            server_store,
            orchestrator,
            _temp_dir: temp_dir,
        }
    }

    /// Sends a request and returns the status with the JSON body (`Null` when
    /// the body is empty or not JSON).
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request("POST", uri, body).await
    }

    /// Records a listen one minute ago.
    pub async fn listen(
        &self,
        track_id: &str,
        listener_id: &str,
        country: Option<&str>,
        listen_secs: u32,
    ) -> (StatusCode, Value) {
        let body = serde_json::json!({
            "track_id": track_id,
            "listener_id": listener_id,
            "country": country,
            "listen_secs": listen_secs,
            "timestamp": chrono::Utc::now().timestamp() - 60,
        });
        self.post("/v1/listens", Some(body)).await
    }

    /// Records `count` full listens of `track_id` from distinct listeners.
    pub async fn listen_many(&self, track_id: &str, count: usize, country: Option<&str>) {
        for i in 0..count {
            let (status, _) = self
                .listen(track_id, &format!("listener-{}", i), country, TRACK_DURATION_SECS)
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    pub async fn run_pipeline(&self) -> Value {
        let (status, report) = self.post("/v1/admin/pipeline/all", None).await;
        assert_eq!(status, StatusCode::OK, "pipeline failed: {}", report);
        report
    }
}
