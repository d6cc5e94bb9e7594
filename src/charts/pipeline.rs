//! The chart pipeline stages driven by the scheduler and by manual triggers.
//!
//! Aggregation merges stats under the exclusive side of the stats gate while a
//! chart-update cycle holds the shared side for its whole duration, so every
//! chart built in one cycle sees the same cutoff of stats. Each stage also
//! has its own guard: a second concurrent run of the same stage fails fast
//! with [`PipelineError::StageBusy`].

use super::aggregator::{AggregationReport, DailyAggregator};
use super::builder::{BuildReport, ChartBuilder};
use super::countries::{active_countries, ActivityThresholds};
use super::dates::{date_of, days_before, start_of_day, SECS_PER_DAY};
use super::error::PipelineError;
use crate::catalog_store::TrackCatalog;
use crate::chart_store::{counters, state_keys, ChartScope, ChartStore, ChartType, GLOBAL_SCOPE};
use crate::config::ChartsSettings;
use crate::server::metrics;
use crate::server_store::{ServerStore, HEALTH_REPORT_STATE_KEY};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A stage that can be triggered on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Aggregation,
    ChartUpdate,
    All,
}

impl PipelineStage {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aggregation" => Some(PipelineStage::Aggregation),
            "chartUpdate" | "chart_update" => Some(PipelineStage::ChartUpdate),
            "all" => Some(PipelineStage::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartUpdateReport {
    pub chart_date: u32,
    /// Stats watermark the whole cycle was built from.
    pub stats_watermark: Option<i64>,
    pub countries: Vec<String>,
    pub charts_built: usize,
    pub charts_failed: usize,
    pub entries_written: usize,
}

impl ChartUpdateReport {
    fn add_build(&mut self, build: &BuildReport) {
        self.charts_built += 1;
        self.entries_written += build.entries_written;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyRecalcReport {
    pub orphan_snapshots_pruned: usize,
    pub chart_update: ChartUpdateReport,
    pub peaks_lowered: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub listen_events_deleted: usize,
    pub snapshots_deleted: usize,
    pub daily_stats_deleted: usize,
    pub orphan_stats_deleted: usize,
    pub audit_entries_deleted: usize,
    pub failed_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: i64,
    /// Listen events not aggregated yet.
    pub backlog: u64,
    pub snapshots_generated_today: u64,
    pub active_countries: u64,
    pub stats_watermark: Option<i64>,
    pub charts_watermark: Option<i64>,
    pub alert: bool,
    pub alert_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_update: Option<ChartUpdateReport>,
}

pub struct ChartPipeline {
    chart_store: Arc<dyn ChartStore>,
    catalog: Arc<dyn TrackCatalog>,
    server_store: Arc<dyn ServerStore>,
    settings: ChartsSettings,
    /// Zero chart output is only alarming once a whole update interval of the day went by.
    chart_update_interval_secs: i64,
    aggregator: DailyAggregator,
    builder: ChartBuilder,

    stats_gate: RwLock<()>,
    aggregation_guard: Mutex<()>,
    chart_update_guard: Mutex<()>,
    daily_recalc_guard: Mutex<()>,
    cleanup_guard: Mutex<()>,
    health_check_guard: Mutex<()>,
}

fn try_enter<'a>(
    guard: &'a Mutex<()>,
    stage: &'static str,
) -> Result<MutexGuard<'a, ()>, PipelineError> {
    match guard.try_lock() {
        Ok(held) => Ok(held),
        // A panicking run leaves nothing half-done behind the guard itself
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => Err(PipelineError::StageBusy(stage)),
    }
}

impl ChartPipeline {
    pub fn new(
        chart_store: Arc<dyn ChartStore>,
        catalog: Arc<dyn TrackCatalog>,
        server_store: Arc<dyn ServerStore>,
        settings: ChartsSettings,
        chart_update_interval_secs: i64,
    ) -> Self {
        let aggregator = DailyAggregator::new(
            chart_store.clone(),
            catalog.clone(),
            settings.listen_event_retention_hours,
        );
        let builder = ChartBuilder::new(chart_store.clone(), catalog.clone(), &settings);
        Self {
            chart_store,
            catalog,
            server_store,
            settings,
            chart_update_interval_secs,
            aggregator,
            builder,
            stats_gate: RwLock::new(()),
            aggregation_guard: Mutex::new(()),
            chart_update_guard: Mutex::new(()),
            daily_recalc_guard: Mutex::new(()),
            cleanup_guard: Mutex::new(()),
            health_check_guard: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ChartsSettings {
        &self.settings
    }

    /// Blocks every stage that reads or merges stats while the guard lives.
    #[cfg(test)]
    pub(crate) fn hold_stats_gate(&self) -> std::sync::RwLockWriteGuard<'_, ()> {
        self.stats_gate.write().unwrap()
    }

    fn event_retention_secs(&self) -> i64 {
        self.settings.listen_event_retention_hours as i64 * 3600
    }

    fn read_watermark(&self, key: &str) -> anyhow::Result<Option<i64>> {
        let value = self.chart_store.get_pipeline_state(key)?;
        Ok(value.and_then(|v| match v.parse() {
            Ok(ts) => Some(ts),
            Err(_) => {
                warn!("Ignoring malformed pipeline state {}={}", key, v);
                None
            }
        }))
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Merges every pending listen event older than `now` into daily stats.
    ///
    /// The window reaches back to the event retention horizon rather than to
    /// the previous watermark, so groups that failed last time and events
    /// reported late are picked up again until they are pruned.
    pub fn run_aggregation(&self, now: i64) -> Result<AggregationReport, PipelineError> {
        let _stage = try_enter(&self.aggregation_guard, "aggregation")?;
        let _stats = self.stats_gate.write().unwrap_or_else(PoisonError::into_inner);

        let window_start = now - self.event_retention_secs();
        let report = self.aggregator.aggregate(window_start, now, now)?;
        self.chart_store
            .set_pipeline_state(state_keys::STATS_WATERMARK, &now.to_string())?;
        Ok(report)
    }

    // =========================================================================
    // Chart update
    // =========================================================================

    /// Builds the global chart and the chart of every active country.
    pub fn run_chart_update(
        &self,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<ChartUpdateReport, PipelineError> {
        let _stage = try_enter(&self.chart_update_guard, "chart_update")?;
        self.chart_update_locked(now, cancel)
    }

    /// Chart update body; the caller holds the chart-update guard.
    fn chart_update_locked(
        &self,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<ChartUpdateReport, PipelineError> {
        let _stats = self.stats_gate.read().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let chart_date = date_of(now);
        let mut report = ChartUpdateReport {
            chart_date,
            stats_watermark: self.read_watermark(state_keys::STATS_WATERMARK)?,
            ..Default::default()
        };

        // The global chart failing fails the stage, but country charts are still attempted
        let global_error = match self.builder.build_chart(&ChartScope::Global, chart_date, now) {
            Ok(build) => {
                report.add_build(&build);
                None
            }
            Err(e) => {
                error!("Global chart build failed: {:#}", e);
                report.charts_failed += 1;
                Some(e)
            }
        };

        let thresholds = ActivityThresholds {
            min_valid_listens: self.settings.min_valid_listens,
            min_unique_tracks: self.settings.min_unique_tracks,
            max_countries: self.settings.max_countries,
        };
        let countries = active_countries(
            self.chart_store.as_ref(),
            chart_date,
            self.settings.country_lookback_days,
            thresholds,
        )
        .context("Failed to select active countries")?;
        debug!("Active countries: {:?}", countries);

        for code in &countries {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let scope = ChartScope::Country(code.clone());
            match self.builder.build_chart(&scope, chart_date, now) {
                Ok(build) => report.add_build(&build),
                Err(e) => {
                    warn!("Chart build for {} failed: {:#}", code, e);
                    report.charts_failed += 1;
                }
            }
        }
        report.countries = countries;

        if let Some(e) = global_error {
            return Err(e.context("Global chart build failed").into());
        }
        if let Some(watermark) = report.stats_watermark {
            self.chart_store
                .set_pipeline_state(state_keys::CHARTS_WATERMARK, &watermark.to_string())?;
        }

        info!(
            "Chart update for {}: {} charts, {} entries, {} failed",
            chart_date, report.charts_built, report.entries_written, report.charts_failed
        );
        Ok(report)
    }

    // =========================================================================
    // Daily recalc
    // =========================================================================

    /// Prunes snapshots of tracks that are gone or no longer eligible, reruns
    /// the chart update and lowers catalog peaks to the best retained peak.
    ///
    /// Rows of the chart date being rebuilt are left to the rebuild, which
    /// replaces each page whole, so no published page ever has rank gaps.
    pub fn run_daily_recalc(
        &self,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<DailyRecalcReport, PipelineError> {
        let _stage = try_enter(&self.daily_recalc_guard, "daily_recalc")?;
        let _charts = try_enter(&self.chart_update_guard, "chart_update")?;

        let chart_date = date_of(now);
        let orphan_snapshots_pruned = self.prune_orphan_snapshots(chart_date)?;
        let chart_update = self.chart_update_locked(now, cancel)?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let peaks_lowered = self.recompute_peaks()?;

        info!(
            "Daily recalc: {} orphan snapshot rows pruned, {} peaks lowered",
            orphan_snapshots_pruned, peaks_lowered
        );
        Ok(DailyRecalcReport {
            orphan_snapshots_pruned,
            chart_update,
            peaks_lowered,
        })
    }

    fn prune_orphan_snapshots(&self, before_date: u32) -> anyhow::Result<usize> {
        let mut orphans = Vec::new();
        for track_id in self.chart_store.get_snapshot_track_ids()? {
            match self.catalog.get_track(&track_id) {
                Ok(Some(track)) if track.chart_eligible => {}
                Ok(_) => orphans.push(track_id),
                Err(e) => warn!("Keeping snapshots of {}: lookup failed: {}", track_id, e),
            }
        }
        if orphans.is_empty() {
            return Ok(0);
        }

        let pruned = self
            .chart_store
            .delete_snapshots_for_tracks(&orphans, before_date)?;
        self.chart_store
            .increment_counter(counters::ORPHAN_SNAPSHOTS_PRUNED, pruned as u64)?;
        Ok(pruned)
    }

    fn recompute_peaks(&self) -> anyhow::Result<usize> {
        let peaks = self
            .chart_store
            .get_best_peaks(ChartType::Global, GLOBAL_SCOPE)?;
        let mut lowered = 0;
        for (track_id, peak) in peaks {
            match self.catalog.lower_peak_position(&track_id, peak) {
                Ok(true) => lowered += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to recompute peak of {}: {}", track_id, e),
            }
        }
        Ok(lowered)
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Applies the retention horizons. Steps are independent: a failing step
    /// is logged and the others still run, then the stage reports failure.
    pub fn run_cleanup(&self, now: i64) -> Result<CleanupReport, PipelineError> {
        let _stage = try_enter(&self.cleanup_guard, "cleanup")?;
        let today = date_of(now);
        let mut report = CleanupReport::default();

        fn step(
            report: &mut CleanupReport,
            name: &str,
            result: anyhow::Result<usize>,
        ) -> usize {
            result.unwrap_or_else(|e| {
                warn!("Cleanup step {} failed: {:#}", name, e);
                report.failed_steps.push(name.to_string());
                0
            })
        }

        report.listen_events_deleted = step(
            &mut report,
            "listen_events",
            self.chart_store
                .delete_listen_events_before(now - self.event_retention_secs()),
        );
        report.snapshots_deleted = step(
            &mut report,
            "snapshots",
            self.chart_store
                .delete_snapshots_before(days_before(today, self.settings.snapshot_retention_days)),
        );
        {
            let _stats = self.stats_gate.write().unwrap_or_else(PoisonError::into_inner);
            report.daily_stats_deleted = step(
                &mut report,
                "daily_stats",
                self.chart_store
                    .delete_daily_stats_before(days_before(today, self.settings.stat_retention_days)),
            );
            report.orphan_stats_deleted = step(
                &mut report,
                "orphan_stats",
                self.delete_orphan_stats(),
            );
        }
        let audit_horizon = now - self.settings.snapshot_retention_days as i64 * SECS_PER_DAY;
        report.audit_entries_deleted = step(
            &mut report,
            "audit_log",
            self.server_store.cleanup_old_job_audit_entries(audit_horizon),
        );

        info!(
            "Cleanup: {} events, {} snapshot rows, {} stat rows, {} orphan stat rows, {} audit entries",
            report.listen_events_deleted,
            report.snapshots_deleted,
            report.daily_stats_deleted,
            report.orphan_stats_deleted,
            report.audit_entries_deleted
        );
        if !report.failed_steps.is_empty() {
            return Err(anyhow::anyhow!(
                "cleanup steps failed: {}",
                report.failed_steps.join(", ")
            )
            .into());
        }
        Ok(report)
    }

    /// Removes stat rows of tracks that no longer exist in the catalog.
    fn delete_orphan_stats(&self) -> anyhow::Result<usize> {
        let mut missing = Vec::new();
        for track_id in self.chart_store.get_stat_track_ids()? {
            if self.catalog.get_track(&track_id)?.is_none() {
                missing.push(track_id);
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }
        self.chart_store.delete_daily_stats_for_tracks(&missing)
    }

    // =========================================================================
    // Health check
    // =========================================================================

    /// Recomputes the health summary, stores it and raises the alert gauge on
    /// a large backlog or on missing chart output.
    pub fn run_health_check(&self, now: i64) -> Result<HealthReport, PipelineError> {
        let _stage = try_enter(&self.health_check_guard, "health_check")?;
        let today = date_of(now);
        let day_start = start_of_day(today);

        let mut report = HealthReport {
            checked_at: now,
            backlog: self.chart_store.count_listen_events()?,
            snapshots_generated_today: self.chart_store.count_snapshots_generated_since(day_start)?,
            active_countries: self.chart_store.count_country_charts_on(today)?,
            stats_watermark: self.read_watermark(state_keys::STATS_WATERMARK)?,
            charts_watermark: self.read_watermark(state_keys::CHARTS_WATERMARK)?,
            ..Default::default()
        };

        if report.backlog > self.settings.backlog_alert_threshold {
            report.alert_reasons.push(format!(
                "listen backlog {} above {}",
                report.backlog, self.settings.backlog_alert_threshold
            ));
        }
        if report.snapshots_generated_today == 0 && now - day_start >= self.chart_update_interval_secs
        {
            report
                .alert_reasons
                .push("no chart snapshots generated today".to_string());
        }
        report.alert = !report.alert_reasons.is_empty();

        let json = serde_json::to_string(&report).context("Failed to encode health report")?;
        self.server_store.set_state(HEALTH_REPORT_STATE_KEY, &json)?;
        metrics::set_health(report.backlog, report.active_countries, report.alert);

        if report.alert {
            warn!("Chart pipeline health alert: {}", report.alert_reasons.join("; "));
        } else {
            debug!(
                "Chart pipeline healthy: backlog {}, {} snapshots today",
                report.backlog, report.snapshots_generated_today
            );
        }
        Ok(report)
    }

    // =========================================================================
    // Manual triggers
    // =========================================================================

    pub fn trigger_stage(
        &self,
        stage: PipelineStage,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::default();
        if matches!(stage, PipelineStage::Aggregation | PipelineStage::All) {
            report.aggregation = Some(self.run_aggregation(now)?);
        }
        if matches!(stage, PipelineStage::ChartUpdate | PipelineStage::All) {
            report.chart_update = Some(self.run_chart_update(now, cancel)?);
        }
        Ok(report)
    }
}
