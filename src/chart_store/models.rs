use serde::{Deserialize, Serialize};

/// Pseudo-country under which global stats and charts are stored.
pub const GLOBAL_SCOPE: &str = "GLOBAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Global,
    Country,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Global => "global",
            ChartType::Country => "country",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ChartType::Global),
            "country" => Some(ChartType::Country),
            _ => None,
        }
    }
}

/// The axis charts are segmented by: the whole world or a single country.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChartScope {
    Global,
    Country(String),
}

impl ChartScope {
    /// Accepts ISO 3166-1 alpha-2 codes in any case and normalizes them to upper case.
    pub fn country(code: &str) -> Option<Self> {
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(ChartScope::Country(code.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Parses a stored scope key, `GLOBAL` or a country code.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.eq_ignore_ascii_case(GLOBAL_SCOPE) {
            Some(ChartScope::Global)
        } else {
            Self::country(key)
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ChartScope::Global => GLOBAL_SCOPE,
            ChartScope::Country(code) => code,
        }
    }

    pub fn chart_type(&self) -> ChartType {
        match self {
            ChartScope::Global => ChartType::Global,
            ChartScope::Country(_) => ChartType::Country,
        }
    }
}

impl std::fmt::Display for ChartScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    New,
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::New => "new",
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Trend::New),
            "up" => Some(Trend::Up),
            "down" => Some(Trend::Down),
            "stable" => Some(Trend::Stable),
            _ => None,
        }
    }
}

/// A playback attempt as handed over by the playback-tracking producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListenEvent {
    pub track_id: String,
    /// User id, or an anonymous session id.
    pub listener_id: String,
    pub country: Option<String>,
    pub listen_secs: u32,
    /// Unix seconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenEvent {
    pub id: i64,
    pub track_id: String,
    pub listener_id: String,
    pub country: Option<String>,
    pub listen_secs: u32,
    pub is_valid: bool,
    pub timestamp: i64,
}

/// Display facts copied out of the catalog so chart reads never depend on the
/// track still existing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackDisplay {
    pub name: String,
    pub artist_name: String,
    pub genre: Option<String>,
    pub duration_secs: u32,
}

/// One row of `daily_track_stats`. Also used as the additive delta produced by
/// an aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTrackStat {
    pub track_id: String,
    pub country: String,
    /// YYYYMMDD
    pub date: u32,
    pub listen_count: u64,
    pub valid_listen_count: u64,
    pub total_listen_secs: u64,
    /// Approximate; merged by max across runs.
    pub unique_listeners: u64,
    pub display: TrackDisplay,
}

/// One ranked row of a published chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartEntry {
    pub chart_type: ChartType,
    pub country: String,
    pub chart_date: u32,
    pub track_id: String,
    pub rank: u32,
    pub chart_score: f64,
    pub trend: Trend,
    pub previous_rank: Option<u32>,
    pub rank_change: i32,
    pub days_in_chart: u32,
    pub peak_position: u32,
    #[serde(flatten)]
    pub display: TrackDisplay,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryActivity {
    pub country: String,
    pub valid_listens: u64,
    pub distinct_tracks: u64,
}

/// Selects snapshot rows for cache diagnostics and cache clearing. Unset
/// fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheFilter {
    pub chart_type: Option<ChartType>,
    pub country: Option<String>,
    pub date: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotGroupInfo {
    pub chart_type: ChartType,
    pub country: String,
    pub chart_date: u32,
    pub entries: u64,
    pub generated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheDiagnostics {
    pub total_entries: u64,
    pub groups: Vec<SnapshotGroupInfo>,
}

/// Names of the counters kept in `pipeline_counters`.
pub mod counters {
    pub const EVENTS_AGGREGATED: &str = "events_aggregated";
    pub const EVENTS_DROPPED: &str = "events_dropped";
    /// Events reported for a day whose stats were already sealed.
    pub const EVENTS_LATE: &str = "events_late";
    pub const GROUPS_FAILED: &str = "groups_failed";
    pub const CANDIDATES_DROPPED: &str = "candidates_dropped";
    pub const CHART_ENTRIES_WRITTEN: &str = "chart_entries_written";
    pub const ORPHAN_SNAPSHOTS_PRUNED: &str = "orphan_snapshots_pruned";
}

/// Keys of the `pipeline_state` table.
pub mod state_keys {
    /// Upper bound (exclusive, unix seconds) of events merged into daily stats.
    pub const STATS_WATERMARK: &str = "stats_watermark";
    /// Stats watermark observed by the last completed chart-update cycle.
    pub const CHARTS_WATERMARK: &str = "charts_watermark";
}
