//! Rolls raw listen events into per-track, per-country, per-day stats.
//!
//! The unit of work is one `(track, date)` group. Its per-country rows and the
//! global row are merged together with the deletion of the events they were
//! computed from, so a group is either fully counted or left untouched for
//! the next run.
//!
//! A day stays open until the end of the following day, so events still
//! pending at midnight are folded into the day they belong to. Rows of older
//! days are sealed: events reported for them are discarded and counted.

use super::dates::{date_of, days_before};
use crate::catalog_store::{CatalogTrack, TrackCatalog};
use crate::chart_store::{
    counters, ChartStore, DailyTrackStat, ListenEvent, TrackDisplay, GLOBAL_SCOPE,
};
use crate::server::metrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationReport {
    pub window_start: i64,
    pub window_end: i64,
    pub events_read: usize,
    pub groups_processed: usize,
    pub groups_failed: usize,
    pub events_aggregated: usize,
    pub events_dropped: usize,
    /// Events of sealed days, discarded.
    pub events_late: usize,
    pub events_pruned: usize,
}

#[derive(Default)]
struct Accumulator<'a> {
    listens: u64,
    valid_listens: u64,
    listen_secs: u64,
    listeners: HashSet<&'a str>,
}

impl<'a> Accumulator<'a> {
    fn add(&mut self, event: &'a ListenEvent) {
        self.listens += 1;
        if event.is_valid {
            self.valid_listens += 1;
        }
        self.listen_secs += event.listen_secs as u64;
        self.listeners.insert(event.listener_id.as_str());
    }

    fn into_stat(
        self,
        track_id: &str,
        country: &str,
        date: u32,
        display: &TrackDisplay,
    ) -> DailyTrackStat {
        DailyTrackStat {
            track_id: track_id.to_string(),
            country: country.to_string(),
            date,
            listen_count: self.listens,
            valid_listen_count: self.valid_listens,
            total_listen_secs: self.listen_secs,
            unique_listeners: self.listeners.len() as u64,
            display: display.clone(),
        }
    }
}

/// Builds the global row and one row per country for a single group.
/// Events without a country only count toward the global row.
fn build_group_stats(
    track_id: &str,
    date: u32,
    events: &[&ListenEvent],
    display: &TrackDisplay,
) -> Vec<DailyTrackStat> {
    let mut global = Accumulator::default();
    let mut by_country: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for event in events {
        global.add(event);
        if let Some(country) = event.country.as_deref() {
            by_country.entry(country).or_default().add(event);
        }
    }

    let mut stats = vec![global.into_stat(track_id, GLOBAL_SCOPE, date, display)];
    stats.extend(
        by_country
            .into_iter()
            .map(|(country, acc)| acc.into_stat(track_id, country, date, display)),
    );
    stats
}

pub struct DailyAggregator {
    chart_store: Arc<dyn ChartStore>,
    catalog: Arc<dyn TrackCatalog>,
    event_retention_secs: i64,
}

impl DailyAggregator {
    pub fn new(
        chart_store: Arc<dyn ChartStore>,
        catalog: Arc<dyn TrackCatalog>,
        event_retention_hours: u64,
    ) -> Self {
        Self {
            chart_store,
            catalog,
            event_retention_secs: event_retention_hours as i64 * 3600,
        }
    }

    /// Aggregates events with `window_start <= timestamp < window_end`.
    ///
    /// Failing to read the events is fatal. Every other failure is confined
    /// to its group, which is logged and left in place for the next run.
    pub fn aggregate(
        &self,
        window_start: i64,
        window_end: i64,
        now: i64,
    ) -> Result<AggregationReport> {
        let events = self
            .chart_store
            .get_listen_events_in_window(window_start, window_end)
            .context("Failed to read listen events")?;

        let mut report = AggregationReport {
            window_start,
            window_end,
            events_read: events.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<(&str, u32), Vec<&ListenEvent>> = BTreeMap::new();
        for event in &events {
            groups
                .entry((event.track_id.as_str(), date_of(event.timestamp)))
                .or_default()
                .push(event);
        }
        debug!(
            "Aggregating {} events in {} groups",
            events.len(),
            groups.len()
        );

        let oldest_open_date = days_before(date_of(now), 1);
        let mut tracks: HashMap<&str, Option<CatalogTrack>> = HashMap::new();
        for (&(track_id, date), group) in &groups {
            if date < oldest_open_date {
                let ids: Vec<i64> = group.iter().map(|e| e.id).collect();
                debug!("Discarding {} late events of {}@{}", ids.len(), track_id, date);
                match self.chart_store.delete_listen_events(&ids) {
                    Ok(_) => report.events_late += ids.len(),
                    Err(e) => {
                        warn!("Failed to discard late events of {}: {}", track_id, e);
                        report.groups_failed += 1;
                    }
                }
                continue;
            }

            let track = match tracks.get(track_id) {
                Some(track) => track.clone(),
                None => match self.catalog.get_track(track_id) {
                    Ok(track) => {
                        tracks.insert(track_id, track.clone());
                        track
                    }
                    Err(e) => {
                        warn!(
                            "Skipping group {}@{}: catalog lookup failed: {}",
                            track_id, date, e
                        );
                        report.groups_failed += 1;
                        continue;
                    }
                },
            };

            let ids: Vec<i64> = group.iter().map(|e| e.id).collect();
            match track.filter(|t| t.chart_eligible) {
                Some(track) => {
                    let stats = build_group_stats(track_id, date, group, &track.display());
                    match self.chart_store.merge_daily_stats(&stats, &ids) {
                        Ok(()) => {
                            report.groups_processed += 1;
                            report.events_aggregated += ids.len();
                        }
                        Err(e) => {
                            warn!("Failed to merge group {}@{}: {}", track_id, date, e);
                            report.groups_failed += 1;
                        }
                    }
                }
                None => {
                    debug!(
                        "Dropping {} events of missing or ineligible track {}",
                        ids.len(),
                        track_id
                    );
                    match self.chart_store.delete_listen_events(&ids) {
                        Ok(_) => {
                            report.groups_processed += 1;
                            report.events_dropped += ids.len();
                        }
                        Err(e) => {
                            warn!("Failed to discard events of {}: {}", track_id, e);
                            report.groups_failed += 1;
                        }
                    }
                }
            }
        }

        // Unaggregated events past the retention horizon are lost on purpose
        match self
            .chart_store
            .delete_listen_events_before(now - self.event_retention_secs)
        {
            Ok(pruned) => report.events_pruned = pruned,
            Err(e) => warn!("Failed to prune old listen events: {}", e),
        }

        self.record_counters(&report);
        info!(
            "Aggregation [{}, {}): {} groups, {} events aggregated, {} dropped, {} late, {} failed groups, {} pruned",
            window_start,
            window_end,
            report.groups_processed,
            report.events_aggregated,
            report.events_dropped,
            report.events_late,
            report.groups_failed,
            report.events_pruned
        );
        Ok(report)
    }

    fn record_counters(&self, report: &AggregationReport) {
        metrics::record_listen_events(report.events_aggregated, report.events_dropped);
        metrics::record_failed_groups(report.groups_failed);

        for (name, value) in [
            (counters::EVENTS_AGGREGATED, report.events_aggregated),
            (counters::EVENTS_DROPPED, report.events_dropped),
            (counters::EVENTS_LATE, report.events_late),
            (counters::GROUPS_FAILED, report.groups_failed),
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
