//! The slice of the track catalog the chart engine depends on.
//!
//! Tracks and artists are owned by the catalog CRUD side of the system. The
//! engine only reads eligibility and display facts, and writes back chart
//! positions.

mod models;
mod schema;
mod store;

#[cfg(test)]
mod memory_store;

pub use models::*;
pub use schema::CATALOG_VERSIONED_SCHEMAS;
pub use store::SqliteTrackCatalog;

#[cfg(test)]
pub use memory_store::InMemoryTrackCatalog;

use anyhow::Result;
use std::collections::HashSet;

pub trait TrackCatalog: Send + Sync {
    fn get_track(&self, track_id: &str) -> Result<Option<CatalogTrack>>;

    /// Sets the current position, lowers the peak when `rank` is better and
    /// stamps the update time. Returns false when the track does not exist.
    fn update_chart_position(&self, track_id: &str, rank: u32, updated_at: i64) -> Result<bool>;

    /// Clears the current position of every charted track not in `keep`.
    fn clear_current_chart_positions(&self, keep: &HashSet<String>, updated_at: i64)
        -> Result<usize>;

    /// Lowers the stored peak to `peak` if that is better. Returns whether
    /// anything changed.
    fn lower_peak_position(&self, track_id: &str, peak: u32) -> Result<bool>;
}
