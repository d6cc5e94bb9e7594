use crate::chart_store::TrackDisplay;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub artist_name: String,
    pub genre: Option<String>,
    pub duration_secs: u32,
    pub chart_eligible: bool,
    pub peak_chart_position: Option<u32>,
    pub current_chart_position: Option<u32>,
    pub last_chart_update: Option<i64>,
}

impl CatalogTrack {
    pub fn display(&self) -> TrackDisplay {
        TrackDisplay {
            name: self.name.clone(),
            artist_name: self.artist_name.clone(),
            genre: self.genre.clone(),
            duration_secs: self.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrack {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub genre: Option<String>,
    pub duration_secs: u32,
    pub chart_eligible: bool,
}
