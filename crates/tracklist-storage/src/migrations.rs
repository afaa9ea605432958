//! Database schema migrations.
//!
//! The fixed schema is only the collection catalog. Per-collection tables
//! are created at runtime from each collection's declared schema.

use rusqlite::Connection;
use tracing::info;

use tracklist_core::error::{Result, TracklistError};

/// Tables owned by the store itself. Collections may not use these names.
pub const RESERVED_TABLES: [&str; 2] = ["schema_migrations", "collections"];

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| {
        TracklistError::StoreWrite(format!("Failed to create migrations table: {}", e))
    })?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            TracklistError::StoreQuery(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: collection_catalog");
    }

    Ok(())
}

/// Version 1: collection catalog.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collections (
            name            TEXT PRIMARY KEY NOT NULL,
            schema_json     TEXT NOT NULL,
            index_json      TEXT NOT NULL DEFAULT '{\"indexes\":[]}',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'collection_catalog');
        ",
    )
    .map_err(|e| TracklistError::StoreWrite(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
