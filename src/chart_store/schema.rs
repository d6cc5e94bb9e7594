//! Schema of the charts database, the state this engine owns: raw listen
//! events, per-day track stats, published chart snapshots and pipeline
//! bookkeeping.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const LISTEN_EVENTS_TABLE_V1: Table = Table {
    name: "listen_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("listener_id", &SqlType::Text, non_null = true),
        sqlite_column!("country", &SqlType::Text),
        sqlite_column!("listen_secs", &SqlType::Integer, non_null = true),
        sqlite_column!("is_valid", &SqlType::Integer, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true), // unix seconds
    ],
    indices: &[("idx_listen_events_timestamp", "timestamp")],
    unique_constraints: &[],
};

const DAILY_TRACK_STATS_TABLE_V1: Table = Table {
    name: "daily_track_stats",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("country", &SqlType::Text, non_null = true), // 'GLOBAL' or ISO alpha-2
        sqlite_column!("date", &SqlType::Integer, non_null = true), // YYYYMMDD
        sqlite_column!("listen_count", &SqlType::Integer, non_null = true),
        sqlite_column!("valid_listen_count", &SqlType::Integer, non_null = true),
        sqlite_column!("total_listen_secs", &SqlType::Integer, non_null = true),
        sqlite_column!("unique_listeners", &SqlType::Integer, non_null = true),
        sqlite_column!("track_name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("duration_secs", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_daily_track_stats_country_date", "country, date"),
        ("idx_daily_track_stats_date", "date"),
    ],
    unique_constraints: &[&["track_id", "country", "date"]],
};

const CHART_SNAPSHOTS_TABLE_V1: Table = Table {
    name: "chart_snapshots",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("chart_type", &SqlType::Text, non_null = true), // 'global' | 'country'
        sqlite_column!("country", &SqlType::Text, non_null = true),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
        sqlite_column!("chart_date", &SqlType::Integer, non_null = true), // YYYYMMDD
        sqlite_column!("rank", &SqlType::Integer, non_null = true),
        sqlite_column!("chart_score", &SqlType::Real, non_null = true),
        sqlite_column!("trend", &SqlType::Text, non_null = true),
        sqlite_column!("previous_rank", &SqlType::Integer),
        sqlite_column!("rank_change", &SqlType::Integer, non_null = true),
        sqlite_column!("days_in_chart", &SqlType::Integer, non_null = true),
        sqlite_column!("peak_position", &SqlType::Integer, non_null = true),
        sqlite_column!("track_name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_name", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("duration_secs", &SqlType::Integer, non_null = true),
        sqlite_column!("generated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        (
            "idx_chart_snapshots_scope_date",
            "chart_type, country, chart_date, rank",
        ),
        ("idx_chart_snapshots_track", "track_id"),
    ],
    unique_constraints: &[&["chart_type", "country", "track_id", "chart_date"]],
};

const PIPELINE_COUNTERS_TABLE_V1: Table = Table {
    name: "pipeline_counters",
    columns: &[
        sqlite_column!("name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const PIPELINE_STATE_TABLE_V1: Table = Table {
    name: "pipeline_state",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub static CHARTS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        LISTEN_EVENTS_TABLE_V1,
        DAILY_TRACK_STATS_TABLE_V1,
        CHART_SNAPSHOTS_TABLE_V1,
        PIPELINE_COUNTERS_TABLE_V1,
        PIPELINE_STATE_TABLE_V1,
    ],
    migration: None,
}];
