use super::dates::days_before;
use crate::chart_store::{ChartStore, CountryActivity};
use anyhow::Result;

/// Thresholds a country must meet to get its own chart in a cycle.
#[derive(Debug, Clone, Copy)]
pub struct ActivityThresholds {
    pub min_valid_listens: u64,
    pub min_unique_tracks: u64,
    pub max_countries: usize,
}

/// Keeps the countries meeting both thresholds, busiest first, at most
/// `max_countries` of them. Countries with equal volume are ordered by code.
pub fn select_active_countries(
    mut activity: Vec<CountryActivity>,
    thresholds: ActivityThresholds,
) -> Vec<String> {
    activity.retain(|a| {
        a.valid_listens >= thresholds.min_valid_listens
            && a.distinct_tracks >= thresholds.min_unique_tracks
    });
    activity.sort_by(|a, b| {
        b.valid_listens
            .cmp(&a.valid_listens)
            .then_with(|| a.country.cmp(&b.country))
    });
    activity
        .into_iter()
        .take(thresholds.max_countries)
        .map(|a| a.country)
        .collect()
}

/// Active countries over the `lookback_days` dates ending at `as_of`.
pub fn active_countries(
    chart_store: &dyn ChartStore,
    as_of: u32,
    lookback_days: u32,
    thresholds: ActivityThresholds,
) -> Result<Vec<String>> {
    let from_date = days_before(as_of, lookback_days.saturating_sub(1));
    let activity = chart_store.get_country_activity(from_date, as_of)?;
    Ok(select_active_countries(activity, thresholds))
}
