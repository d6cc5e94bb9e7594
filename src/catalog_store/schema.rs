use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const ARTISTS_TABLE_V1: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("genre", &SqlType::Text),
        sqlite_column!("duration_secs", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "chart_eligible",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("peak_chart_position", &SqlType::Integer),
        sqlite_column!("current_chart_position", &SqlType::Integer),
        sqlite_column!("last_chart_update", &SqlType::Integer), // unix seconds
    ],
    indices: &[
        ("idx_tracks_artist", "artist_id"),
        ("idx_tracks_current_chart", "current_chart_position"),
    ],
    unique_constraints: &[],
};

pub static CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[ARTISTS_TABLE_V1, TRACKS_TABLE_V1],
    migration: None,
}];
