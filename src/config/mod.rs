mod file_config;

pub use file_config::{BackgroundJobsConfig, ChartsConfig, FileConfig};

use crate::charts::DecaySchedule;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// Hard ceiling for the published page, shared with the query limits.
pub const MAX_PAGE_SIZE: usize = 100;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,

    pub charts: ChartsSettings,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let content_cache_age_sec = file
            .content_cache_age_sec
            .unwrap_or(cli.content_cache_age_sec);

        let charts = ChartsSettings::from_file(file.charts.unwrap_or_default())?;
        let background_jobs =
            BackgroundJobsSettings::from_file(file.background_jobs.unwrap_or_default())?;

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            content_cache_age_sec,
            charts,
            background_jobs,
        })
    }

    pub fn charts_db_path(&self) -> PathBuf {
        self.db_dir.join("charts.db")
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

/// Tuning of the chart pipeline.
#[derive(Debug, Clone)]
pub struct ChartsSettings {
    /// Entries published per chart.
    pub page_size: usize,
    /// Scored candidates considered before resolving against the catalog.
    pub candidate_pool: usize,
    pub decay: DecaySchedule,
    pub lookback_days: u32,
    pub country_lookback_days: u32,
    pub min_valid_listens: u64,
    pub min_unique_tracks: u64,
    pub max_countries: usize,
    pub listen_event_retention_hours: u64,
    pub snapshot_retention_days: u32,
    pub stat_retention_days: u32,
    pub backlog_alert_threshold: u64,
}

impl Default for ChartsSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            candidate_pool: 200,
            decay: DecaySchedule::default(),
            lookback_days: 5,
            country_lookback_days: 7,
            min_valid_listens: 100,
            min_unique_tracks: 10,
            max_countries: 50,
            listen_event_retention_hours: 48,
            snapshot_retention_days: 90,
            stat_retention_days: 30,
            backlog_alert_threshold: 100_000,
        }
    }
}

impl ChartsSettings {
    fn from_file(file: ChartsConfig) -> Result<Self> {
        let defaults = Self::default();
        let decay = match file.decay {
            Some(steps) => DecaySchedule::new(steps)?,
            None => defaults.decay,
        };
        let settings = Self {
            page_size: file.page_size.unwrap_or(defaults.page_size),
            candidate_pool: file.candidate_pool.unwrap_or(defaults.candidate_pool),
            decay,
            lookback_days: file.lookback_days.unwrap_or(defaults.lookback_days),
            country_lookback_days: file
                .country_lookback_days
                .unwrap_or(defaults.country_lookback_days),
            min_valid_listens: file.min_valid_listens.unwrap_or(defaults.min_valid_listens),
            min_unique_tracks: file.min_unique_tracks.unwrap_or(defaults.min_unique_tracks),
            max_countries: file.max_countries.unwrap_or(defaults.max_countries),
            listen_event_retention_hours: file
                .listen_event_retention_hours
                .unwrap_or(defaults.listen_event_retention_hours),
            snapshot_retention_days: file
                .snapshot_retention_days
                .unwrap_or(defaults.snapshot_retention_days),
            stat_retention_days: file
                .stat_retention_days
                .unwrap_or(defaults.stat_retention_days),
            backlog_alert_threshold: file
                .backlog_alert_threshold
                .unwrap_or(defaults.backlog_alert_threshold),
        };

        if settings.page_size == 0 || settings.page_size > MAX_PAGE_SIZE {
            bail!(
                "charts.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                settings.page_size
            );
        }
        if settings.candidate_pool < settings.page_size {
            bail!(
                "charts.candidate_pool ({}) must not be smaller than charts.page_size ({})",
                settings.candidate_pool,
                settings.page_size
            );
        }
        if settings.lookback_days == 0 || settings.country_lookback_days == 0 {
            bail!("charts lookback windows must be at least one day");
        }
        Ok(settings)
    }
}

/// Cadence of the scheduled jobs.
#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub aggregation_interval_mins: u64,
    pub chart_update_interval_mins: u64,
    /// Delay of the first chart update after startup, so it follows a fresh aggregation.
    pub chart_update_offset_mins: u64,
    pub daily_recalc_interval_hours: u64,
    pub cleanup_interval_days: u64,
    pub health_check_interval_mins: u64,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            aggregation_interval_mins: 15,
            chart_update_interval_mins: 15,
            chart_update_offset_mins: 5,
            daily_recalc_interval_hours: 24,
            cleanup_interval_days: 7,
            health_check_interval_mins: 60,
        }
    }
}

impl BackgroundJobsSettings {
    fn from_file(file: BackgroundJobsConfig) -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            aggregation_interval_mins: file
                .aggregation_interval_mins
                .unwrap_or(defaults.aggregation_interval_mins),
            chart_update_interval_mins: file
                .chart_update_interval_mins
                .unwrap_or(defaults.chart_update_interval_mins),
            chart_update_offset_mins: file
                .chart_update_offset_mins
                .unwrap_or(defaults.chart_update_offset_mins),
            daily_recalc_interval_hours: file
                .daily_recalc_interval_hours
                .unwrap_or(defaults.daily_recalc_interval_hours),
            cleanup_interval_days: file
                .cleanup_interval_days
                .unwrap_or(defaults.cleanup_interval_days),
            health_check_interval_mins: file
                .health_check_interval_mins
                .unwrap_or(defaults.health_check_interval_mins),
        };

        let intervals = [
            settings.aggregation_interval_mins,
            settings.chart_update_interval_mins,
            settings.daily_recalc_interval_hours,
            settings.cleanup_interval_days,
            settings.health_check_interval_mins,
        ];
        if intervals.contains(&0) {
            bail!("background job intervals must be greater than zero");
        }
        Ok(settings)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::DecayStep;
    use tempfile::TempDir;

    fn cli_with_dir(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Headers,
            content_cache_age_sec: 60,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 3001);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.charts.page_size, 100);
        assert_eq!(config.charts.candidate_pool, 200);
        assert_eq!(config.charts.decay, DecaySchedule::default());
        assert_eq!(config.charts.min_valid_listens, 100);
        assert_eq!(config.background_jobs.chart_update_offset_mins, 5);
        assert_eq!(config.background_jobs.cleanup_interval_days, 7);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            ..Default::default()
        };

        let toml_text = format!(
            r#"
db_dir = "{}"
port = 4000
logging_level = "body"

[charts]
page_size = 50
max_countries = 10

[[charts.decay]]
day_offset = 0
weight = 1.0

[[charts.decay]]
day_offset = 1
weight = 0.5

[background_jobs]
aggregation_interval_mins = 5
"#,
            temp_dir.path().display()
        );
        let file_config: FileConfig = toml::from_str(&toml_text).unwrap();

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.charts.page_size, 50);
        assert_eq!(config.charts.max_countries, 10);
        assert_eq!(config.charts.decay.weight(1), 0.5);
        assert_eq!(config.charts.decay.weight(2), 0.0);
        assert_eq!(config.background_jobs.aggregation_interval_mins, 5);
        assert_eq!(config.background_jobs.chart_update_interval_mins, 15);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_rejects_bad_chart_settings() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_dir(&temp_dir);

        let too_big = FileConfig {
            charts: Some(ChartsConfig {
                page_size: Some(101),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(too_big)).is_err());

        let small_pool = FileConfig {
            charts: Some(ChartsConfig {
                page_size: Some(50),
                candidate_pool: Some(20),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(small_pool)).is_err());

        let bad_decay = FileConfig {
            charts: Some(ChartsConfig {
                decay: Some(vec![DecayStep {
                    day_offset: 0,
                    weight: 2.0,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(bad_decay)).is_err());
    }

    #[test]
    fn test_resolve_rejects_zero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let file = FileConfig {
            background_jobs: Some(BackgroundJobsConfig {
                health_check_interval_mins: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_with_dir(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_with_dir(&temp_dir), None).unwrap();

        assert_eq!(config.charts_db_path(), temp_dir.path().join("charts.db"));
        assert_eq!(config.catalog_db_path(), temp_dir.path().join("catalog.db"));
        assert_eq!(config.server_db_path(), temp_dir.path().join("server.db"));
    }
}
