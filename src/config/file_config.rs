use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::charts::DecayStep;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub content_cache_age_sec: Option<usize>,

    pub charts: Option<ChartsConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ChartsConfig {
    pub page_size: Option<usize>,
    pub candidate_pool: Option<usize>,
    /// `[[charts.decay]]` tables with `day_offset` and `weight`
    pub decay: Option<Vec<DecayStep>>,
    pub lookback_days: Option<u32>,
    pub country_lookback_days: Option<u32>,
    pub min_valid_listens: Option<u64>,
    pub min_unique_tracks: Option<u64>,
    pub max_countries: Option<usize>,
    pub listen_event_retention_hours: Option<u64>,
    pub snapshot_retention_days: Option<u32>,
    pub stat_retention_days: Option<u32>,
    pub backlog_alert_threshold: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub aggregation_interval_mins: Option<u64>,
    pub chart_update_interval_mins: Option<u64>,
    pub chart_update_offset_mins: Option<u64>,
    pub daily_recalc_interval_hours: Option<u64>,
    pub cleanup_interval_days: Option<u64>,
    pub health_check_interval_mins: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
