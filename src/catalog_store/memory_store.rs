//! In-memory catalog used by the pipeline tests.

use super::models::{CatalogTrack, NewTrack};
use super::TrackCatalog;
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryTrackCatalog {
    tracks: Mutex<HashMap<String, CatalogTrack>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl InMemoryTrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, track: NewTrack, artist_name: &str) {
        let track = CatalogTrack {
            id: track.id,
            name: track.name,
            artist_id: track.artist_id,
            artist_name: artist_name.to_string(),
            genre: track.genre,
            duration_secs: track.duration_secs,
            chart_eligible: track.chart_eligible,
            peak_chart_position: None,
            current_chart_position: None,
            last_chart_update: None,
        };
        self.tracks.lock().unwrap().insert(track.id.clone(), track);
    }

    /// Adds an eligible 200 second track named after its id.
    pub fn add_simple(&self, id: &str) {
        self.add(
            NewTrack {
                id: id.to_string(),
                name: format!("Track {}", id),
                artist_id: "artist".to_string(),
                genre: None,
                duration_secs: 200,
                chart_eligible: true,
            },
            "Artist",
        );
    }

    pub fn remove(&self, id: &str) {
        self.tracks.lock().unwrap().remove(id);
    }

    pub fn set_eligible(&self, id: &str, eligible: bool) {
        if let Some(track) = self.tracks.lock().unwrap().get_mut(id) {
            track.chart_eligible = eligible;
        }
    }

    /// Makes chart write-backs for `id` fail.
    pub fn fail_writes_for(&self, id: &str) {
        self.failing_writes.lock().unwrap().insert(id.to_string());
    }

    pub fn track(&self, id: &str) -> Option<CatalogTrack> {
        self.tracks.lock().unwrap().get(id).cloned()
    }
}

impl TrackCatalog for InMemoryTrackCatalog {
    fn get_track(&self, track_id: &str) -> Result<Option<CatalogTrack>> {
        Ok(self.track(track_id))
    }

    fn update_chart_position(&self, track_id: &str, rank: u32, updated_at: i64) -> Result<bool> {
        if self.failing_writes.lock().unwrap().contains(track_id) {
            bail!("write-back failed for {}", track_id);
        }
        let mut tracks = self.tracks.lock().unwrap();
        let Some(track) = tracks.get_mut(track_id) else {
            return Ok(false);
        };
        track.current_chart_position = Some(rank);
        track.peak_chart_position = Some(track.peak_chart_position.map_or(rank, |p| p.min(rank)));
        track.last_chart_update = Some(updated_at);
        Ok(true)
    }

    fn clear_current_chart_positions(
        &self,
        keep: &HashSet<String>,
        updated_at: i64,
    ) -> Result<usize> {
        let mut cleared = 0;
        for track in self.tracks.lock().unwrap().values_mut() {
            if track.current_chart_position.is_some() && !keep.contains(&track.id) {
                track.current_chart_position = None;
                track.last_chart_update = Some(updated_at);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn lower_peak_position(&self, track_id: &str, peak: u32) -> Result<bool> {
        let mut tracks = self.tracks.lock().unwrap();
        match tracks.get_mut(track_id) {
            Some(track) if track.peak_chart_position.map_or(true, |p| p > peak) => {
                track.peak_chart_position = Some(peak);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
