//! Intake of playback signals from the playback-tracking producer.

use super::error::ListenError;
use crate::catalog_store::TrackCatalog;
use crate::chart_store::{ChartScope, ChartStore, NewListenEvent};
use tracing::debug;

/// Shortest listen that ever counts, whatever the track length.
pub const MIN_VALID_LISTEN_SECS: u32 = 30;

/// A listen is valid when it lasts at least 30 seconds and at least a
/// quarter of the track.
pub fn is_valid_listen(listen_secs: u32, track_duration_secs: u32) -> bool {
    let quarter = track_duration_secs.div_ceil(4);
    listen_secs >= MIN_VALID_LISTEN_SECS.max(quarter)
}

/// Validates and stores one listen event, returning its id and validity.
pub fn record_listen(
    chart_store: &dyn ChartStore,
    catalog: &dyn TrackCatalog,
    mut event: NewListenEvent,
) -> Result<(i64, bool), ListenError> {
    if let Some(country) = event.country.take() {
        match ChartScope::country(&country) {
            Some(scope) => event.country = Some(scope.key().to_string()),
            None => return Err(ListenError::InvalidCountry(country)),
        }
    }

    let track = catalog
        .get_track(&event.track_id)?
        .ok_or_else(|| ListenError::UnknownTrack(event.track_id.clone()))?;
    let is_valid = is_valid_listen(event.listen_secs, track.duration_secs);

    let id = chart_store.record_listen_event(&event, is_valid)?;
    debug!(
        "Recorded listen {} of track {} (valid: {})",
        id, event.track_id, is_valid
    );
    Ok((id, is_valid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::InMemoryTrackCatalog;
    use crate::chart_store::SqliteChartStore;
    use tempfile::TempDir;

    #[test]
    fn test_validity_threshold_is_max_of_floor_and_quarter() {
        // Short track: the 30s floor wins
        assert!(!is_valid_listen(29, 60));
        assert!(is_valid_listen(30, 60));
        // Long track: a quarter of 400s is 100s
        assert!(!is_valid_listen(99, 400));
        assert!(is_valid_listen(100, 400));
        // Quarter is rounded up
        assert!(!is_valid_listen(125, 501));
        assert!(is_valid_listen(126, 501));
    }

    #[test]
    fn test_records_event_with_computed_validity() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteChartStore::new(temp_dir.path().join("charts.db")).unwrap();
        let catalog = InMemoryTrackCatalog::new();
        catalog.add_simple("t1");

        let event = NewListenEvent {
            track_id: "t1".to_string(),
            listener_id: "session-9".to_string(),
            country: Some("de".to_string()),
            listen_secs: 40,
            timestamp: 1_700_000_000,
        };
        let (_, valid) = record_listen(&store, &catalog, event).unwrap();
        // 40s of a 200s track is below the 50s quarter
        assert!(!valid);

        let events = store
            .get_listen_events_in_window(1_700_000_000, 1_700_000_001)
            .unwrap();
        assert_eq!(events[0].country.as_deref(), Some("DE"));
    }

    #[test]
    fn test_rejects_unknown_track_and_bad_country() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteChartStore::new(temp_dir.path().join("charts.db")).unwrap();
        let catalog = InMemoryTrackCatalog::new();
        catalog.add_simple("t1");

        let mut event = NewListenEvent {
            track_id: "nope".to_string(),
            listener_id: "u".to_string(),
            country: None,
            listen_secs: 100,
            timestamp: 1,
        };
        assert!(matches!(
            record_listen(&store, &catalog, event.clone()),
            Err(ListenError::UnknownTrack(_))
        ));

        event.track_id = "t1".to_string();
        event.country = Some("Italy".to_string());
        assert!(matches!(
            record_listen(&store, &catalog, event),
            Err(ListenError::InvalidCountry(_))
        ));
    }
}
