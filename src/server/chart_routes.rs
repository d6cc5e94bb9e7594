//! Public read routes over the chart façade, plus listen intake.

use super::metrics;
use super::state::{GuardedChartStore, GuardedQueryService, GuardedTrackCatalog};
use crate::chart_store::{ChartScope, NewListenEvent};
use crate::charts::{
    parse_chart_scope, parse_scope, record_listen, ChartQueryError, ListenError,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

const DEFAULT_CHART_LIMIT: usize = 100;
const DEFAULT_TRENDING_LIMIT: usize = 20;
const DEFAULT_HISTORY_DAYS: u32 = 30;

#[derive(Deserialize, Debug)]
pub(super) struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub(super) struct TrendingParams {
    pub country: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub(super) struct HistoryParams {
    pub country: Option<String>,
    pub days: Option<u32>,
}

#[derive(Serialize)]
struct RecordedListen {
    id: i64,
    valid: bool,
}

pub(super) fn query_error_response(err: ChartQueryError, endpoint: &str) -> Response {
    match err {
        ChartQueryError::Store(e) => {
            error!("Chart query on {} failed: {:#}", endpoint, e);
            metrics::record_error("store", endpoint);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        other => (StatusCode::BAD_REQUEST, other.to_string()).into_response(),
    }
}

fn respond_chart(
    query_service: &GuardedQueryService,
    scope: Result<ChartScope, ChartQueryError>,
    limit: Option<usize>,
) -> Response {
    let result = scope.and_then(|scope| {
        query_service.get_chart(&scope, limit.unwrap_or(DEFAULT_CHART_LIMIT))
    });
    match result {
        Ok(page) => Json(page).into_response(),
        Err(err) => query_error_response(err, "charts"),
    }
}

pub(super) async fn get_global_chart(
    State(query_service): State<GuardedQueryService>,
    Query(params): Query<LimitParams>,
) -> Response {
    respond_chart(&query_service, Ok(ChartScope::Global), params.limit)
}

pub(super) async fn get_country_chart(
    State(query_service): State<GuardedQueryService>,
    Path(code): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    let scope = parse_chart_scope("country", Some(code.as_str()));
    respond_chart(&query_service, scope, params.limit)
}

pub(super) async fn get_trending(
    State(query_service): State<GuardedQueryService>,
    Query(params): Query<TrendingParams>,
) -> Response {
    let result = parse_scope(params.country.as_deref()).and_then(|scope| {
        query_service.get_trending(&scope, params.limit.unwrap_or(DEFAULT_TRENDING_LIMIT))
    });
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => query_error_response(err, "trending"),
    }
}

pub(super) async fn get_track_history(
    State(query_service): State<GuardedQueryService>,
    Path(track_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let result = parse_scope(params.country.as_deref()).and_then(|scope| {
        query_service.get_track_history(
            &track_id,
            &scope,
            params.days.unwrap_or(DEFAULT_HISTORY_DAYS),
        )
    });
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => query_error_response(err, "chart_history"),
    }
}

pub(super) async fn get_stats(State(query_service): State<GuardedQueryService>) -> Response {
    match query_service.get_stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => query_error_response(err, "stats"),
    }
}

pub(super) async fn post_listen(
    State(chart_store): State<GuardedChartStore>,
    State(catalog): State<GuardedTrackCatalog>,
    Json(event): Json<NewListenEvent>,
) -> Response {
    match record_listen(chart_store.as_ref(), catalog.as_ref(), event) {
        Ok((id, valid)) => (StatusCode::CREATED, Json(RecordedListen { id, valid })).into_response(),
        Err(ListenError::UnknownTrack(track_id)) => {
            (StatusCode::NOT_FOUND, format!("unknown track: {}", track_id)).into_response()
        }
        Err(err @ ListenError::InvalidCountry(_)) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(ListenError::Store(e)) => {
            error!("Failed to record listen: {:#}", e);
            metrics::record_error("store", "listens");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
