//! Ranks scored candidates, diffs them against the previously published chart
//! and republishes the snapshot for one scope.

use super::scoring::{ScoreCalculator, ScoredCandidate};
use crate::catalog_store::{CatalogTrack, TrackCatalog};
use crate::chart_store::{counters, ChartEntry, ChartScope, ChartStore, ChartType, Trend};
use crate::config::ChartsSettings;
use crate::server::metrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rank moves of at most this many positions are reported as stable.
pub const TREND_DEAD_ZONE: i32 = 5;

/// Trend and signed rank change of a track now at `rank`. A positive change
/// means the track moved up.
pub fn derive_trend(previous_rank: Option<u32>, rank: u32) -> (Trend, i32) {
    let Some(previous) = previous_rank else {
        return (Trend::New, 0);
    };
    let change = previous as i32 - rank as i32;
    let trend = if change > TREND_DEAD_ZONE {
        Trend::Up
    } else if change < -TREND_DEAD_ZONE {
        Trend::Down
    } else {
        Trend::Stable
    };
    (trend, change)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub scope: String,
    pub chart_date: u32,
    pub candidates_scored: usize,
    pub candidates_dropped: usize,
    pub entries_written: usize,
    pub write_back_failures: usize,
}

pub struct ChartBuilder {
    chart_store: Arc<dyn ChartStore>,
    catalog: Arc<dyn TrackCatalog>,
    scorer: ScoreCalculator,
    page_size: usize,
    candidate_pool: usize,
    lookback_days: u32,
}

impl ChartBuilder {
    pub fn new(
        chart_store: Arc<dyn ChartStore>,
        catalog: Arc<dyn TrackCatalog>,
        settings: &ChartsSettings,
    ) -> Self {
        Self {
            scorer: ScoreCalculator::new(chart_store.clone(), settings.decay.clone()),
            chart_store,
            catalog,
            page_size: settings.page_size,
            candidate_pool: settings.candidate_pool,
            lookback_days: settings.lookback_days,
        }
    }

    /// Builds and atomically publishes the chart of `scope` for `chart_date`.
    pub fn build_chart(&self, scope: &ChartScope, chart_date: u32, now: i64) -> Result<BuildReport> {
        let chart_type = scope.chart_type();
        let country = scope.key();

        let candidates = self
            .scorer
            .score_tracks(scope, chart_date, self.lookback_days, self.candidate_pool)
            .with_context(|| format!("Failed to score {} chart", scope))?;

        let previous_ranks: HashMap<String, u32> = self
            .chart_store
            .get_latest_chart(chart_type, country)?
            .into_iter()
            .map(|entry| (entry.track_id, entry.rank))
            .collect();
        let best_peaks = self.chart_store.get_best_peaks(chart_type, country)?;

        let mut report = BuildReport {
            scope: scope.to_string(),
            chart_date,
            candidates_scored: candidates.len(),
            ..Default::default()
        };

        let mut entries: Vec<ChartEntry> = Vec::with_capacity(self.page_size);
        for candidate in &candidates {
            if entries.len() == self.page_size {
                break;
            }
            let Some(track) = self.resolve(candidate) else {
                report.candidates_dropped += 1;
                continue;
            };

            let rank = entries.len() as u32 + 1;
            let previous_rank = previous_ranks.get(&candidate.track_id).copied();
            let (trend, rank_change) = derive_trend(previous_rank, rank);
            let peak_position = best_peaks
                .get(&candidate.track_id)
                .map_or(rank, |&peak| peak.min(rank));

            entries.push(ChartEntry {
                chart_type,
                country: country.to_string(),
                chart_date,
                track_id: candidate.track_id.clone(),
                rank,
                chart_score: candidate.score,
                trend,
                previous_rank,
                rank_change,
                days_in_chart: candidate.days_in_chart,
                peak_position,
                display: track.display(),
                generated_at: now,
            });
        }

        report.entries_written = self
            .chart_store
            .replace_chart(chart_type, country, chart_date, &entries)
            .with_context(|| format!("Failed to publish {} chart", scope))?;

        if chart_type == ChartType::Global {
            report.write_back_failures = self.write_back_positions(&entries, now);
        }

        self.record_counters(chart_type, &report);
        info!(
            "Published {} chart for {}: {} entries ({} candidates, {} dropped)",
            scope,
            chart_date,
            report.entries_written,
            report.candidates_scored,
            report.candidates_dropped
        );
        Ok(report)
    }

    /// The catalog track behind a candidate, if it still exists and may chart.
    fn resolve(&self, candidate: &ScoredCandidate) -> Option<CatalogTrack> {
        match self.catalog.get_track(&candidate.track_id) {
            Ok(Some(track)) if track.chart_eligible => Some(track),
            Ok(_) => {
                debug!(
                    "Dropping candidate {}: missing or not chart-eligible",
                    candidate.track_id
                );
                None
            }
            Err(e) => {
                warn!("Dropping candidate {}: lookup failed: {}", candidate.track_id, e);
                None
            }
        }
    }

    /// Pushes global positions to the catalog and clears tracks that fell off.
    /// Returns the number of failed writes.
    fn write_back_positions(&self, entries: &[ChartEntry], now: i64) -> usize {
        let mut failures = 0;
        for entry in entries {
            if let Err(e) = self
                .catalog
                .update_chart_position(&entry.track_id, entry.rank, now)
            {
                warn!(
                    "Failed to update chart position of {}: {}",
                    entry.track_id, e
                );
                failures += 1;
            }
        }

        let keep: HashSet<String> = entries.iter().map(|e| e.track_id.clone()).collect();
        match self.catalog.clear_current_chart_positions(&keep, now) {
            Ok(cleared) if cleared > 0 => debug!("Cleared chart position of {} tracks", cleared),
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to clear stale chart positions: {}", e);
                failures += 1;
            }
        }
        failures
    }

    fn record_counters(&self, chart_type: ChartType, report: &BuildReport) {
        metrics::record_chart_published(
            chart_type.as_str(),
            report.entries_written,
            report.candidates_dropped,
        );
        for (name, value) in [
            (counters::CHART_ENTRIES_WRITTEN, report.entries_written),
            (counters::CANDIDATES_DROPPED, report.candidates_dropped),
        ] {
            if value == 0 {
                continue;
            }
            if let Err(e) = self.chart_store.increment_counter(name, value as u64) {
                warn!("Failed to update counter {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::InMemoryTrackCatalog;
    use crate::chart_store::{DailyTrackStat, SqliteChartStore, TrackDisplay};
    use tempfile::TempDir;

    const DAY: u32 = 20240310;
    const NOW: i64 = 1_710_072_000;

    struct Fixture {
        store: Arc<SqliteChartStore>,
        catalog: Arc<InMemoryTrackCatalog>,
        builder: ChartBuilder,
        _temp_dir: TempDir,
    }

    fn fixture(page_size: usize) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteChartStore::new(temp_dir.path().join("charts.db")).unwrap());
        let catalog = Arc::new(InMemoryTrackCatalog::new());
        let settings = ChartsSettings {
            page_size,
            candidate_pool: page_size * 2,
            ..Default::default()
        };
        let builder = ChartBuilder::new(store.clone(), catalog.clone(), &settings);
        Fixture {
            store,
            catalog,
            builder,
            _temp_dir: temp_dir,
        }
    }

    /// Replaces the day's valid listen counts with `counts` (one track each).
    fn set_listens(f: &Fixture, country: &str, counts: &[(&str, u64)]) {
        for (track_id, _) in counts {
            if f.catalog.track(track_id).is_none() {
                f.catalog.add_simple(track_id);
            }
        }
        let ids: Vec<String> = counts.iter().map(|(id, _)| id.to_string()).collect();
        f.store.delete_daily_stats_for_tracks(&ids).unwrap();
        let rows: Vec<DailyTrackStat> = counts
            .iter()
            .map(|(id, valid)| DailyTrackStat {
                track_id: id.to_string(),
                country: country.to_string(),
                date: DAY,
                listen_count: *valid,
                valid_listen_count: *valid,
                total_listen_secs: 0,
                unique_listeners: 1,
                display: TrackDisplay::default(),
            })
            .collect();
        f.store.merge_daily_stats(&rows, &[]).unwrap();
    }

    fn ranks(entries: &[ChartEntry]) -> Vec<(String, u32)> {
        entries.iter().map(|e| (e.track_id.clone(), e.rank)).collect()
    }

    #[test]
    fn test_trend_uses_dead_zone() {
        assert_eq!(derive_trend(None, 4), (Trend::New, 0));
        assert_eq!(derive_trend(Some(10), 3), (Trend::Up, 7));
        assert_eq!(derive_trend(Some(3), 3), (Trend::Stable, 0));
        assert_eq!(derive_trend(Some(8), 3), (Trend::Stable, 5));
        assert_eq!(derive_trend(Some(2), 9), (Trend::Down, -7));
        assert_eq!(derive_trend(Some(2), 7), (Trend::Stable, -5));
    }

    #[test]
    fn test_first_build_publishes_dense_new_entries() {
        let f = fixture(10);
        set_listens(&f, "GLOBAL", &[("a", 10), ("b", 30), ("c", 20)]);

        let report = f.builder.build_chart(&ChartScope::Global, DAY, NOW).unwrap();
        assert_eq!(report.entries_written, 3);

        let chart = f.store.get_latest_chart(ChartType::Global, "GLOBAL").unwrap();
        assert_eq!(
            ranks(&chart),
            vec![("b".to_string(), 1), ("c".to_string(), 2), ("a".to_string(), 3)]
        );
        for entry in &chart {
            assert_eq!(entry.trend, Trend::New);
            assert_eq!(entry.previous_rank, None);
            assert_eq!(entry.peak_position, entry.rank);
            assert_eq!(entry.display.artist_name, "Artist");
            assert_eq!(entry.generated_at, NOW);
        }
        assert_eq!(chart[0].chart_score, 30.0);
    }

    #[test]
    fn test_rebuild_diffs_against_published_chart() {
        let f = fixture(10);
        let tracks: Vec<(String, u64)> = (0..10).map(|i| (format!("t{}", i), 100 - i)).collect();
        let counts: Vec<(&str, u64)> = tracks.iter().map(|(id, n)| (id.as_str(), *n)).collect();
        set_listens(&f, "GLOBAL", &counts);
        f.builder.build_chart(&ChartScope::Global, DAY, NOW).unwrap();

        // t9 jumps from 10th to 3rd (ties with t0, which sorts first) and t0
        // slides from 1st to 2nd
        set_listens(&f, "GLOBAL", &[("t9", 100), ("newcomer", 500)]);
        f.builder.build_chart(&ChartScope::Global, DAY, NOW + 60).unwrap();

        let chart = f.store.get_latest_chart(ChartType::Global, "GLOBAL").unwrap();
        let by_id: HashMap<&str, &ChartEntry> =
            chart.iter().map(|e| (e.track_id.as_str(), e)).collect();

        let newcomer = by_id["newcomer"];
        assert_eq!((newcomer.rank, newcomer.trend), (1, Trend::New));

        let jumper = by_id["t9"];
        assert_eq!(jumper.rank, 3);
        assert_eq!(jumper.previous_rank, Some(10));
        assert_eq!(jumper.rank_change, 7);
        assert_eq!(jumper.trend, Trend::Up);

        let leader = by_id["t0"];
        assert_eq!(leader.rank, 2);
        assert_eq!(leader.rank_change, -1);
        assert_eq!(leader.trend, Trend::Stable);
        // Peak never gets worse
        assert_eq!(leader.peak_position, 1);

        // Page is full, so t8 fell off
        assert_eq!(chart.len(), 10);
        assert!(!by_id.contains_key("t8"));
        let ranks: Vec<u32> = chart.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, (1..=10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_unresolvable_candidates_are_skipped_without_rank_gaps() {
        let f = fixture(2);
        set_listens(&f, "GLOBAL", &[("a", 40), ("b", 30), ("c", 20), ("d", 10)]);
        f.catalog.set_eligible("a", false);
        f.catalog.remove("c");

        let report = f.builder.build_chart(&ChartScope::Global, DAY, NOW).unwrap();
        assert_eq!(report.candidates_dropped, 2);

        let chart = f.store.get_latest_chart(ChartType::Global, "GLOBAL").unwrap();
        assert_eq!(ranks(&chart), vec![("b".to_string(), 1), ("d".to_string(), 2)]);
        let totals = f.store.get_counters().unwrap();
        assert_eq!(totals.get(counters::CANDIDATES_DROPPED), Some(&2));
    }

    #[test]
    fn test_global_chart_writes_positions_back_to_catalog() {
        let f = fixture(1);
        set_listens(&f, "GLOBAL", &[("a", 20), ("b", 10)]);
        f.builder.build_chart(&ChartScope::Global, DAY, NOW).unwrap();
        assert_eq!(f.catalog.track("a").unwrap().current_chart_position, Some(1));

        set_listens(&f, "GLOBAL", &[("a", 5), ("b", 10)]);
        f.catalog.fail_writes_for("b");
        let report = f.builder.build_chart(&ChartScope::Global, DAY, NOW + 1).unwrap();
        assert_eq!(report.write_back_failures, 1);

        // The failed write does not stop the chart nor the clearing of `a`
        let a = f.catalog.track("a").unwrap();
        assert_eq!(a.current_chart_position, None);
        assert_eq!(a.peak_chart_position, Some(1));
        let chart = f.store.get_latest_chart(ChartType::Global, "GLOBAL").unwrap();
        assert_eq!(ranks(&chart), vec![("b".to_string(), 1)]);
    }

    #[test]
    fn test_country_chart_is_scoped_and_does_not_write_back() {
        let f = fixture(10);
        set_listens(&f, "IT", &[("a", 20)]);
        let italy = ChartScope::country("it").unwrap();

        f.builder.build_chart(&italy, DAY, NOW).unwrap();

        let chart = f.store.get_latest_chart(ChartType::Country, "IT").unwrap();
        assert_eq!(ranks(&chart), vec![("a".to_string(), 1)]);
        assert!(f
            .store
            .get_latest_chart(ChartType::Global, "GLOBAL")
            .unwrap()
            .is_empty());
        assert_eq!(f.catalog.track("a").unwrap().current_chart_position, None);
    }
}
