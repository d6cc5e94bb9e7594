mod models;
mod schema;
mod sqlite_chart_store;

pub use models::*;
pub use schema::CHARTS_VERSIONED_SCHEMAS;
pub use sqlite_chart_store::SqliteChartStore;

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

/// Storage for everything the chart pipeline owns.
pub trait ChartStore: Send + Sync {
    // =========================================================================
    // Listen events
    // =========================================================================

    fn record_listen_event(&self, event: &NewListenEvent, is_valid: bool) -> Result<i64>;

    /// Events with `window_start <= timestamp < window_end`, oldest first.
    fn get_listen_events_in_window(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<ListenEvent>>;

    fn delete_listen_events(&self, ids: &[i64]) -> Result<usize>;

    /// Deletes events strictly older than `before_timestamp`.
    fn delete_listen_events_before(&self, before_timestamp: i64) -> Result<usize>;

    fn count_listen_events(&self) -> Result<u64>;

    // =========================================================================
    // Daily stats
    // =========================================================================

    /// Additively merges `stats` and deletes the events they were computed
    /// from, in a single transaction.
    fn merge_daily_stats(&self, stats: &[DailyTrackStat], consumed_event_ids: &[i64])
        -> Result<()>;

    /// Rows for `country` with `from_date <= date <= to_date` and at least
    /// one valid listen.
    fn get_daily_stats(
        &self,
        country: &str,
        from_date: u32,
        to_date: u32,
    ) -> Result<Vec<DailyTrackStat>>;

    /// Per-country volume over the date range, global rows excluded.
    fn get_country_activity(&self, from_date: u32, to_date: u32) -> Result<Vec<CountryActivity>>;

    fn get_stat_track_ids(&self) -> Result<Vec<String>>;
    fn delete_daily_stats_for_tracks(&self, track_ids: &[String]) -> Result<usize>;
    fn delete_daily_stats_before(&self, before_date: u32) -> Result<usize>;

    // =========================================================================
    // Chart snapshots
    // =========================================================================

    /// Rows of the most recent published chart date for the scope, by rank.
    fn get_latest_chart(&self, chart_type: ChartType, country: &str) -> Result<Vec<ChartEntry>>;

    /// Best (lowest) peak position ever recorded per track in the scope.
    fn get_best_peaks(&self, chart_type: ChartType, country: &str)
        -> Result<HashMap<String, u32>>;

    /// Atomically replaces every row of (chart_type, country, chart_date).
    fn replace_chart(
        &self,
        chart_type: ChartType,
        country: &str,
        chart_date: u32,
        entries: &[ChartEntry],
    ) -> Result<usize>;

    /// Snapshot rows of one track in a scope with `chart_date >= since_date`,
    /// oldest first.
    fn get_track_history(
        &self,
        track_id: &str,
        chart_type: ChartType,
        country: &str,
        since_date: u32,
    ) -> Result<Vec<ChartEntry>>;

    fn get_snapshot_track_ids(&self) -> Result<Vec<String>>;
    /// Deletes the snapshot rows of `track_ids` dated before `before_date`.
    fn delete_snapshots_for_tracks(&self, track_ids: &[String], before_date: u32) -> Result<usize>;
    fn delete_snapshots_before(&self, before_date: u32) -> Result<usize>;

    fn count_snapshots_generated_since(&self, since_timestamp: i64) -> Result<u64>;
    fn count_country_charts_on(&self, chart_date: u32) -> Result<u64>;

    fn get_cache_diagnostics(&self, filter: &CacheFilter) -> Result<CacheDiagnostics>;
    fn clear_cache(&self, filter: &CacheFilter) -> Result<usize>;

    // =========================================================================
    // Pipeline bookkeeping
    // =========================================================================

    fn increment_counter(&self, name: &str, by: u64) -> Result<()>;
    fn get_counters(&self) -> Result<BTreeMap<String, u64>>;

    fn get_pipeline_state(&self, key: &str) -> Result<Option<String>>;
    fn set_pipeline_state(&self, key: &str, value: &str) -> Result<()>;
}
