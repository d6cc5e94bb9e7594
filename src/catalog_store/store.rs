use super::models::{CatalogTrack, NewTrack};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::TrackCatalog;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct SqliteTrackCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrackCatalog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open catalog database")?;
        open_versioned(&mut conn, CATALOG_VERSIONED_SCHEMAS, is_new_db, "catalog")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn insert_artist(&self, id: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO artists (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name],
        )?;
        Ok(())
    }

    pub fn insert_track(&self, track: &NewTrack) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks (id, name, artist_id, genre, duration_secs, chart_eligible)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, artist_id = excluded.artist_id,
                 genre = excluded.genre, duration_secs = excluded.duration_secs,
                 chart_eligible = excluded.chart_eligible",
            params![
                track.id,
                track.name,
                track.artist_id,
                track.genre,
                track.duration_secs as i64,
                track.chart_eligible as i64
            ],
        )?;
        Ok(())
    }

    pub fn set_chart_eligible(&self, track_id: &str, eligible: bool) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET chart_eligible = ?1 WHERE id = ?2",
            params![eligible as i64, track_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_track(&self, track_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM tracks WHERE id = ?1", params![track_id])?;
        Ok(deleted > 0)
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<CatalogTrack> {
        Ok(CatalogTrack {
            id: row.get("id")?,
            name: row.get("name")?,
            artist_id: row.get("artist_id")?,
            // Tracks whose artist row is gone still resolve, with an empty artist name
            artist_name: row
                .get::<_, Option<String>>("artist_name")?
                .unwrap_or_default(),
            genre: row.get("genre")?,
            duration_secs: row.get::<_, i64>("duration_secs")? as u32,
            chart_eligible: row.get::<_, i64>("chart_eligible")? != 0,
            peak_chart_position: row
                .get::<_, Option<i64>>("peak_chart_position")?
                .map(|p| p as u32),
            current_chart_position: row
                .get::<_, Option<i64>>("current_chart_position")?
                .map(|p| p as u32),
            last_chart_update: row.get("last_chart_update")?,
        })
    }
}

impl TrackCatalog for SqliteTrackCatalog {
    fn get_track(&self, track_id: &str) -> Result<Option<CatalogTrack>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                "SELECT t.id, t.name, t.artist_id, a.name AS artist_name, t.genre,
                        t.duration_secs, t.chart_eligible, t.peak_chart_position,
                        t.current_chart_position, t.last_chart_update
                 FROM tracks t LEFT JOIN artists a ON a.id = t.artist_id
                 WHERE t.id = ?1",
                params![track_id],
                Self::row_to_track,
            )
            .optional()?;
        Ok(track)
    }

    fn update_chart_position(&self, track_id: &str, rank: u32, updated_at: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET
                 current_chart_position = ?1,
                 peak_chart_position = CASE
                     WHEN peak_chart_position IS NULL OR peak_chart_position > ?1 THEN ?1
                     ELSE peak_chart_position
                 END,
                 last_chart_update = ?2
             WHERE id = ?3",
            params![rank as i64, updated_at, track_id],
        )?;
        Ok(updated > 0)
    }

    fn clear_current_chart_positions(
        &self,
        keep: &HashSet<String>,
        updated_at: i64,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let charted: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM tracks WHERE current_chart_position IS NOT NULL")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        let mut cleared = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE tracks SET current_chart_position = NULL, last_chart_update = ?1
                 WHERE id = ?2",
            )?;
            for id in charted.iter().filter(|id| !keep.contains(*id)) {
                cleared += stmt.execute(params![updated_at, id])?;
            }
        }
        tx.commit()?;
        Ok(cleared)
    }

    fn lower_peak_position(&self, track_id: &str, peak: u32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET peak_chart_position = ?1
             WHERE id = ?2 AND (peak_chart_position IS NULL OR peak_chart_position > ?1)",
            params![peak as i64, track_id],
        )?;
        Ok(updated > 0)
    }
}
