use super::dates::{day_offset, days_before};
use super::decay::DecaySchedule;
use crate::chart_store::{ChartScope, ChartStore, DailyTrackStat, TrackDisplay};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub track_id: String,
    pub score: f64,
    /// Days in the lookback window with at least one valid listen.
    pub days_in_chart: u32,
    /// Display facts of the most recent stat row.
    pub display: TrackDisplay,
}

/// Scores stat rows as of `as_of`, highest score first with ties broken by
/// track id. Rows dated after `as_of` are ignored.
pub fn score_stats(
    stats: &[DailyTrackStat],
    decay: &DecaySchedule,
    as_of: u32,
) -> Vec<ScoredCandidate> {
    struct Acc<'a> {
        score: f64,
        days: u32,
        latest_date: u32,
        display: &'a TrackDisplay,
    }

    let mut by_track: HashMap<&str, Acc> = HashMap::new();
    for stat in stats.iter().filter(|s| s.valid_listen_count > 0) {
        let Some(offset) = day_offset(stat.date, as_of) else {
            continue;
        };
        let contribution = stat.valid_listen_count as f64 * decay.weight(offset);
        let acc = by_track.entry(stat.track_id.as_str()).or_insert(Acc {
            score: 0.0,
            days: 0,
            latest_date: stat.date,
            display: &stat.display,
        });
        acc.score += contribution;
        acc.days += 1;
        if stat.date >= acc.latest_date {
            acc.latest_date = stat.date;
            acc.display = &stat.display;
        }
    }

    let mut candidates: Vec<ScoredCandidate> = by_track
        .into_iter()
        .filter(|(_, acc)| acc.score > 0.0)
        .map(|(track_id, acc)| ScoredCandidate {
            track_id: track_id.to_string(),
            score: acc.score,
            days_in_chart: acc.days,
            display: acc.display.clone(),
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.track_id.cmp(&b.track_id))
    });
    candidates
}

pub struct ScoreCalculator {
    chart_store: Arc<dyn ChartStore>,
    decay: DecaySchedule,
}

impl ScoreCalculator {
    pub fn new(chart_store: Arc<dyn ChartStore>, decay: DecaySchedule) -> Self {
        Self { chart_store, decay }
    }

    /// Ranked candidates for `scope` over the `lookback_days` dates ending at
    /// `as_of`, at most `max_candidates` of them.
    pub fn score_tracks(
        &self,
        scope: &ChartScope,
        as_of: u32,
        lookback_days: u32,
        max_candidates: usize,
    ) -> Result<Vec<ScoredCandidate>> {
        let from_date = days_before(as_of, lookback_days.saturating_sub(1));
        let stats = self.chart_store.get_daily_stats(scope.key(), from_date, as_of)?;

        let mut candidates = score_stats(&stats, &self.decay, as_of);
        candidates.truncate(max_candidates);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart_store::SqliteChartStore;
    use tempfile::TempDir;

    const TODAY: u32 = 20240310;

    fn stat(track_id: &str, date: u32, valid: u64) -> DailyTrackStat {
        DailyTrackStat {
            track_id: track_id.to_string(),
            country: "GLOBAL".to_string(),
            date,
            listen_count: valid,
            valid_listen_count: valid,
            total_listen_secs: 0,
            unique_listeners: 1,
            display: TrackDisplay {
                name: format!("{}@{}", track_id, date),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_recency_weighting_matches_decay_table() {
        let decay = DecaySchedule::default();

        let today = score_stats(&[stat("a", TODAY, 100)], &decay, TODAY);
        assert_eq!(today[0].score, 100.0);

        let two_days_ago = score_stats(&[stat("a", 20240308, 100)], &decay, TODAY);
        assert_eq!(two_days_ago[0].score, 50.0);
    }

    #[test]
    fn test_sums_days_and_counts_qualifying_days() {
        let decay = DecaySchedule::default();
        let stats = [
            stat("a", TODAY, 40),
            stat("a", 20240309, 20),
            stat("a", 20240308, 0),
        ];
        let scored = score_stats(&stats, &decay, TODAY);
        assert_eq!(scored.len(), 1);
        assert!((scored[0].score - 54.0).abs() < 1e-9);
        assert_eq!(scored[0].days_in_chart, 2);
        assert_eq!(scored[0].display.name, format!("a@{}", TODAY));
    }

    #[test]
    fn test_drops_zero_scores_and_breaks_ties_by_track_id() {
        let decay = DecaySchedule::default();
        let stats = [
            stat("b", TODAY, 10),
            stat("a", TODAY, 10),
            stat("c", TODAY, 30),
            // Beyond the decay schedule: weight 0
            stat("old", 20240301, 500),
        ];
        let ids: Vec<String> = score_stats(&stats, &decay, TODAY)
            .into_iter()
            .map(|c| c.track_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_score_is_monotone_in_valid_listens() {
        let decay = DecaySchedule::default();
        let low = score_stats(&[stat("a", 20240309, 10)], &decay, TODAY);
        let high = score_stats(&[stat("a", 20240309, 11)], &decay, TODAY);
        assert!(high[0].score > low[0].score);
    }

    #[test]
    fn test_score_tracks_reads_scope_window_and_truncates() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteChartStore::new(temp_dir.path().join("charts.db")).unwrap());
        let mut rows = vec![];
        for (i, id) in ["t1", "t2", "t3"].iter().enumerate() {
            rows.push(stat(id, TODAY, 10 * (i as u64 + 1)));
        }
        // Outside a 2 day lookback
        rows.push(stat("t4", 20240307, 1000));
        let mut italy = stat("t5", TODAY, 1000);
        italy.country = "IT".to_string();
        rows.push(italy);
        store.merge_daily_stats(&rows, &[]).unwrap();

        let calculator = ScoreCalculator::new(store, DecaySchedule::default());
        let scored = calculator
            .score_tracks(&ChartScope::Global, TODAY, 2, 2)
            .unwrap();
        let ids: Vec<&str> = scored.iter().map(|c| c.track_id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2"]);
    }
}
