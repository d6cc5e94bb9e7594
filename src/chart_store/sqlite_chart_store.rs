use super::models::*;
use super::schema::CHARTS_VERSIONED_SCHEMAS;
use super::ChartStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SNAPSHOT_COLUMNS: &str = "chart_type, country, track_id, chart_date, rank, chart_score, \
     trend, previous_rank, rank_change, days_in_chart, peak_position, track_name, artist_name, \
     genre, duration_secs, generated_at";

const STAT_COLUMNS: &str = "track_id, country, date, listen_count, valid_listen_count, \
     total_listen_secs, unique_listeners, track_name, artist_name, genre, duration_secs";

pub struct SqliteChartStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChartStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open charts database")?;
        open_versioned(&mut conn, CHARTS_VERSIONED_SCHEMAS, is_new_db, "charts")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_listen_event(row: &rusqlite::Row) -> rusqlite::Result<ListenEvent> {
        Ok(ListenEvent {
            id: row.get("id")?,
            track_id: row.get("track_id")?,
            listener_id: row.get("listener_id")?,
            country: row.get("country")?,
            listen_secs: row.get::<_, i64>("listen_secs")? as u32,
            is_valid: row.get::<_, i64>("is_valid")? != 0,
            timestamp: row.get("timestamp")?,
        })
    }

    fn row_to_display(row: &rusqlite::Row) -> rusqlite::Result<TrackDisplay> {
        Ok(TrackDisplay {
            name: row.get("track_name")?,
            artist_name: row.get("artist_name")?,
            genre: row.get("genre")?,
            duration_secs: row.get::<_, i64>("duration_secs")? as u32,
        })
    }

    fn row_to_stat(row: &rusqlite::Row) -> rusqlite::Result<DailyTrackStat> {
        Ok(DailyTrackStat {
            track_id: row.get("track_id")?,
            country: row.get("country")?,
            date: row.get::<_, i64>("date")? as u32,
            listen_count: row.get::<_, i64>("listen_count")? as u64,
            valid_listen_count: row.get::<_, i64>("valid_listen_count")? as u64,
            total_listen_secs: row.get::<_, i64>("total_listen_secs")? as u64,
            unique_listeners: row.get::<_, i64>("unique_listeners")? as u64,
            display: Self::row_to_display(row)?,
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ChartEntry> {
        let chart_type: String = row.get("chart_type")?;
        let trend: String = row.get("trend")?;
        Ok(ChartEntry {
            chart_type: ChartType::parse(&chart_type).unwrap_or(ChartType::Global),
            country: row.get("country")?,
            chart_date: row.get::<_, i64>("chart_date")? as u32,
            track_id: row.get("track_id")?,
            rank: row.get::<_, i64>("rank")? as u32,
            chart_score: row.get("chart_score")?,
            trend: Trend::parse(&trend).unwrap_or(Trend::Stable),
            previous_rank: row.get::<_, Option<i64>>("previous_rank")?.map(|r| r as u32),
            rank_change: row.get::<_, i64>("rank_change")? as i32,
            days_in_chart: row.get::<_, i64>("days_in_chart")? as u32,
            peak_position: row.get::<_, i64>("peak_position")? as u32,
            display: Self::row_to_display(row)?,
            generated_at: row.get("generated_at")?,
        })
    }

    /// Builds the WHERE clause and its positional values for a cache filter.
    fn filter_clause(filter: &CacheFilter) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(chart_type) = filter.chart_type {
            values.push(Value::Text(chart_type.as_str().to_string()));
            clauses.push(format!("chart_type = ?{}", values.len()));
        }
        if let Some(country) = &filter.country {
            values.push(Value::Text(country.to_ascii_uppercase()));
            clauses.push(format!("country = ?{}", values.len()));
        }
        if let Some(date) = filter.date {
            values.push(Value::Integer(date as i64));
            clauses.push(format!("chart_date = ?{}", values.len()));
        }
        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }

    fn delete_by_track_ids(&self, table: &str, track_ids: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE track_id = ?1", table))?;
            for track_id in track_ids {
                deleted += stmt.execute(params![track_id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn distinct_track_ids(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT track_id FROM {} ORDER BY track_id",
            table
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl ChartStore for SqliteChartStore {
    fn record_listen_event(&self, event: &NewListenEvent, is_valid: bool) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO listen_events (track_id, listener_id, country, listen_secs, is_valid, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.track_id,
                event.listener_id,
                event.country.as_deref().map(str::to_ascii_uppercase),
                event.listen_secs as i64,
                is_valid as i64,
                event.timestamp
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_listen_events_in_window(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<ListenEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, track_id, listener_id, country, listen_secs, is_valid, timestamp
             FROM listen_events
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp, id",
        )?;
        let events = stmt
            .query_map(params![window_start, window_end], Self::row_to_listen_event)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read listen events")?;
        Ok(events)
    }

    fn delete_listen_events(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM listen_events WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn delete_listen_events_before(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM listen_events WHERE timestamp < ?1",
            params![before_timestamp],
        )?;
        Ok(deleted)
    }

    fn count_listen_events(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM listen_events", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn merge_daily_stats(
        &self,
        stats: &[DailyTrackStat],
        consumed_event_ids: &[i64],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO daily_track_stats (track_id, country, date, listen_count,
                     valid_listen_count, total_listen_secs, unique_listeners,
                     track_name, artist_name, genre, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(track_id, country, date) DO UPDATE SET
                     listen_count = listen_count + excluded.listen_count,
                     valid_listen_count = valid_listen_count + excluded.valid_listen_count,
                     total_listen_secs = total_listen_secs + excluded.total_listen_secs,
                     unique_listeners = MAX(unique_listeners, excluded.unique_listeners),
                     track_name = excluded.track_name,
                     artist_name = excluded.artist_name,
                     genre = excluded.genre,
                     duration_secs = excluded.duration_secs",
            )?;
            for stat in stats {
                upsert.execute(params![
                    stat.track_id,
                    stat.country,
                    stat.date as i64,
                    stat.listen_count as i64,
                    stat.valid_listen_count as i64,
                    stat.total_listen_secs as i64,
                    stat.unique_listeners as i64,
                    stat.display.name,
                    stat.display.artist_name,
                    stat.display.genre,
                    stat.display.duration_secs as i64,
                ])?;
            }

            let mut delete = tx.prepare("DELETE FROM listen_events WHERE id = ?1")?;
            for id in consumed_event_ids {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_daily_stats(
        &self,
        country: &str,
        from_date: u32,
        to_date: u32,
    ) -> Result<Vec<DailyTrackStat>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM daily_track_stats
             WHERE country = ?1 AND date >= ?2 AND date <= ?3 AND valid_listen_count > 0
             ORDER BY track_id, date",
            STAT_COLUMNS
        ))?;
        let stats = stmt
            .query_map(
                params![country, from_date as i64, to_date as i64],
                Self::row_to_stat,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    fn get_country_activity(&self, from_date: u32, to_date: u32) -> Result<Vec<CountryActivity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT country, SUM(valid_listen_count), COUNT(DISTINCT track_id)
             FROM daily_track_stats
             WHERE country != ?1 AND date >= ?2 AND date <= ?3 AND valid_listen_count > 0
             GROUP BY country",
        )?;
        let activity = stmt
            .query_map(
                params![GLOBAL_SCOPE, from_date as i64, to_date as i64],
                |row| {
                    Ok(CountryActivity {
                        country: row.get(0)?,
                        valid_listens: row.get::<_, i64>(1)? as u64,
                        distinct_tracks: row.get::<_, i64>(2)? as u64,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(activity)
    }

    fn get_stat_track_ids(&self) -> Result<Vec<String>> {
        self.distinct_track_ids("daily_track_stats")
    }

    fn delete_daily_stats_for_tracks(&self, track_ids: &[String]) -> Result<usize> {
        self.delete_by_track_ids("daily_track_stats", track_ids)
    }

    fn delete_daily_stats_before(&self, before_date: u32) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM daily_track_stats WHERE date < ?1",
            params![before_date as i64],
        )?;
        Ok(deleted)
    }

    fn get_latest_chart(&self, chart_type: ChartType, country: &str) -> Result<Vec<ChartEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chart_snapshots
             WHERE chart_type = ?1 AND country = ?2 AND chart_date = (
                 SELECT MAX(chart_date) FROM chart_snapshots WHERE chart_type = ?1 AND country = ?2
             )
             ORDER BY rank",
            SNAPSHOT_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![chart_type.as_str(), country], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn get_best_peaks(
        &self,
        chart_type: ChartType,
        country: &str,
    ) -> Result<HashMap<String, u32>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT track_id, MIN(peak_position) FROM chart_snapshots
             WHERE chart_type = ?1 AND country = ?2
             GROUP BY track_id",
        )?;
        let peaks = stmt
            .query_map(params![chart_type.as_str(), country], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(peaks)
    }

    fn replace_chart(
        &self,
        chart_type: ChartType,
        country: &str,
        chart_date: u32,
        entries: &[ChartEntry],
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chart_snapshots WHERE chart_type = ?1 AND country = ?2 AND chart_date = ?3",
            params![chart_type.as_str(), country, chart_date as i64],
        )?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO chart_snapshots ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                SNAPSHOT_COLUMNS
            ))?;
            for entry in entries {
                insert.execute(params![
                    chart_type.as_str(),
                    country,
                    entry.track_id,
                    chart_date as i64,
                    entry.rank as i64,
                    entry.chart_score,
                    entry.trend.as_str(),
                    entry.previous_rank.map(|r| r as i64),
                    entry.rank_change as i64,
                    entry.days_in_chart as i64,
                    entry.peak_position as i64,
                    entry.display.name,
                    entry.display.artist_name,
                    entry.display.genre,
                    entry.display.duration_secs as i64,
                    entry.generated_at,
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("Failed to publish {} chart for {}", chart_type.as_str(), country))?;
        Ok(entries.len())
    }

    fn get_track_history(
        &self,
        track_id: &str,
        chart_type: ChartType,
        country: &str,
        since_date: u32,
    ) -> Result<Vec<ChartEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chart_snapshots
             WHERE track_id = ?1 AND chart_type = ?2 AND country = ?3 AND chart_date >= ?4
             ORDER BY chart_date",
            SNAPSHOT_COLUMNS
        ))?;
        let entries = stmt
            .query_map(
                params![track_id, chart_type.as_str(), country, since_date as i64],
                Self::row_to_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn get_snapshot_track_ids(&self) -> Result<Vec<String>> {
        self.distinct_track_ids("chart_snapshots")
    }

    fn delete_snapshots_for_tracks(&self, track_ids: &[String], before_date: u32) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM chart_snapshots WHERE track_id = ?1 AND chart_date < ?2",
            )?;
            for track_id in track_ids {
                deleted += stmt.execute(params![track_id, before_date as i64])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn delete_snapshots_before(&self, before_date: u32) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM chart_snapshots WHERE chart_date < ?1",
            params![before_date as i64],
        )?;
        Ok(deleted)
    }

    fn count_snapshots_generated_since(&self, since_timestamp: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chart_snapshots WHERE generated_at >= ?1",
            params![since_timestamp],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_country_charts_on(&self, chart_date: u32) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT country) FROM chart_snapshots
             WHERE chart_type = ?1 AND chart_date = ?2",
            params![ChartType::Country.as_str(), chart_date as i64],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_cache_diagnostics(&self, filter: &CacheFilter) -> Result<CacheDiagnostics> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, values) = Self::filter_clause(filter);
        let mut stmt = conn.prepare(&format!(
            "SELECT chart_type, country, chart_date, COUNT(*), MAX(generated_at)
             FROM chart_snapshots{}
             GROUP BY chart_type, country, chart_date
             ORDER BY chart_date DESC, chart_type, country",
            where_clause
        ))?;
        let groups = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let chart_type: String = row.get(0)?;
                Ok(SnapshotGroupInfo {
                    chart_type: ChartType::parse(&chart_type).unwrap_or(ChartType::Global),
                    country: row.get(1)?,
                    chart_date: row.get::<_, i64>(2)? as u32,
                    entries: row.get::<_, i64>(3)? as u64,
                    generated_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(CacheDiagnostics {
            total_entries: groups.iter().map(|g| g.entries).sum(),
            groups,
        })
    }

    fn clear_cache(&self, filter: &CacheFilter) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, values) = Self::filter_clause(filter);
        let deleted = conn.execute(
            &format!("DELETE FROM chart_snapshots{}", where_clause),
            params_from_iter(values.iter()),
        )?;
        Ok(deleted)
    }

    fn increment_counter(&self, name: &str, by: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pipeline_counters (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = value + excluded.value",
            params![name, by as i64],
        )?;
        Ok(())
    }

    fn get_counters(&self) -> Result<BTreeMap<String, u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, value FROM pipeline_counters")?;
        let counters = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(counters)
    }

    fn get_pipeline_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM pipeline_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_pipeline_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pipeline_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
