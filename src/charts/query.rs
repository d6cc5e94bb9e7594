//! Read side of the chart engine: published charts, trending tracks, per-track
//! history, pipeline stats and snapshot cache maintenance.

use super::dates::{days_before, today};
use super::error::ChartQueryError;
use super::pipeline::HealthReport;
use crate::chart_store::{
    CacheDiagnostics, CacheFilter, ChartEntry, ChartScope, ChartStore, ChartType, Trend,
};
use crate::server_store::{ServerStore, HEALTH_REPORT_STATE_KEY};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_CHART_LIMIT: usize = 100;
pub const MAX_TRENDING_LIMIT: usize = 50;
pub const MAX_HISTORY_DAYS: u32 = 90;

#[derive(Debug, Clone, Serialize)]
pub struct ChartPage {
    pub chart_type: ChartType,
    pub country: String,
    /// Date of the published chart, `None` while no chart exists yet.
    pub chart_date: Option<u32>,
    pub entries: Vec<ChartEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartStats {
    pub counters: BTreeMap<String, u64>,
    pub listen_backlog: u64,
    pub health: Option<HealthReport>,
}

/// Resolves an optional country code into a scope; no code means global.
pub fn parse_scope(country: Option<&str>) -> Result<ChartScope, ChartQueryError> {
    match country {
        None => Ok(ChartScope::Global),
        Some(code) => ChartScope::from_key(code)
            .ok_or_else(|| ChartQueryError::InvalidScope(code.to_string())),
    }
}

/// Resolves a chart type and an optional country into a scope, rejecting
/// combinations such as a country chart without a country.
pub fn parse_chart_scope(
    chart_type: &str,
    country: Option<&str>,
) -> Result<ChartScope, ChartQueryError> {
    let chart_type = ChartType::parse(chart_type)
        .ok_or_else(|| ChartQueryError::InvalidChartType(chart_type.to_string()))?;
    let scope = parse_scope(country)?;
    if scope.chart_type() != chart_type {
        return Err(ChartQueryError::InvalidScope(format!(
            "{} chart cannot be scoped to {}",
            chart_type.as_str(),
            country.unwrap_or("nothing")
        )));
    }
    Ok(scope)
}

fn check_limit(limit: usize, max: usize) -> Result<(), ChartQueryError> {
    if limit == 0 || limit > max {
        return Err(ChartQueryError::InvalidLimit { max, got: limit });
    }
    Ok(())
}

pub struct ChartQueryService {
    chart_store: Arc<dyn ChartStore>,
    server_store: Arc<dyn ServerStore>,
}

impl ChartQueryService {
    pub fn new(chart_store: Arc<dyn ChartStore>, server_store: Arc<dyn ServerStore>) -> Self {
        Self {
            chart_store,
            server_store,
        }
    }

    /// The current ranked page of `scope`. A scope without any published
    /// chart yields an empty page.
    pub fn get_chart(&self, scope: &ChartScope, limit: usize) -> Result<ChartPage, ChartQueryError> {
        check_limit(limit, MAX_CHART_LIMIT)?;
        let mut entries = self
            .chart_store
            .get_latest_chart(scope.chart_type(), scope.key())?;
        entries.truncate(limit);
        Ok(ChartPage {
            chart_type: scope.chart_type(),
            country: scope.key().to_string(),
            chart_date: entries.first().map(|e| e.chart_date),
            entries,
        })
    }

    /// Entries of the current chart that are new or climbing, biggest climb
    /// first, then by score.
    pub fn get_trending(
        &self,
        scope: &ChartScope,
        limit: usize,
    ) -> Result<Vec<ChartEntry>, ChartQueryError> {
        check_limit(limit, MAX_TRENDING_LIMIT)?;
        let mut trending: Vec<ChartEntry> = self
            .chart_store
            .get_latest_chart(scope.chart_type(), scope.key())?
            .into_iter()
            .filter(|e| matches!(e.trend, Trend::Up | Trend::New))
            .collect();
        trending.sort_by(|a, b| {
            b.rank_change
                .cmp(&a.rank_change)
                .then_with(|| b.chart_score.total_cmp(&a.chart_score))
        });
        trending.truncate(limit);
        Ok(trending)
    }

    /// Snapshot rows of `track_id` in `scope` over the last `days` days,
    /// oldest first.
    pub fn get_track_history(
        &self,
        track_id: &str,
        scope: &ChartScope,
        days: u32,
    ) -> Result<Vec<ChartEntry>, ChartQueryError> {
        if days == 0 || days > MAX_HISTORY_DAYS {
            return Err(ChartQueryError::InvalidDays {
                max: MAX_HISTORY_DAYS,
                got: days,
            });
        }
        let since = days_before(today(), days - 1);
        Ok(self
            .chart_store
            .get_track_history(track_id, scope.chart_type(), scope.key(), since)?)
    }

    pub fn get_stats(&self) -> Result<ChartStats, ChartQueryError> {
        let health = match self.server_store.get_state(HEALTH_REPORT_STATE_KEY)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Ignoring unreadable health report: {}", e);
                    None
                }
            },
            None => None,
        };
        Ok(ChartStats {
            counters: self.chart_store.get_counters()?,
            listen_backlog: self.chart_store.count_listen_events()?,
            health,
        })
    }

    pub fn get_cache_diagnostics(
        &self,
        filter: CacheFilter,
    ) -> Result<CacheDiagnostics, ChartQueryError> {
        let filter = normalize_filter(filter)?;
        Ok(self.chart_store.get_cache_diagnostics(&filter)?)
    }

    pub fn clear_cache(&self, filter: CacheFilter) -> Result<usize, ChartQueryError> {
        let filter = normalize_filter(filter)?;
        let cleared = self.chart_store.clear_cache(&filter)?;
        info!("Cleared {} chart snapshot rows ({:?})", cleared, filter);
        Ok(cleared)
    }
}

fn normalize_filter(mut filter: CacheFilter) -> Result<CacheFilter, ChartQueryError> {
    if let Some(country) = filter.country.take() {
        let scope = parse_scope(Some(&country))?;
        filter.country = Some(scope.key().to_string());
    }
    Ok(filter)
}
