//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::DatabaseError;

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        r#"
        -- Durable job queue
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            available_at INTEGER NOT NULL,
            lease_expires_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            lease_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status_available ON jobs(status, available_at);

        -- Vector index entries
        -- Embeddings are stored as little-endian f32 BLOBs and searched brute force.
        -- seq preserves first-insertion order for stable tie-breaking; upserts keep it.
        CREATE TABLE IF NOT EXISTS index_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            job_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            source_file TEXT NOT NULL,
            page_number INTEGER,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_index_entries_job ON index_entries(job_id);

        -- Index-wide facts such as the embedding dimension
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    run_settings_table_migration(conn)?;

    Ok(())
}

/// Migration: Add settings table for runtime overrides
fn run_settings_table_migration(conn: &Connection) -> Result<(), DatabaseError> {
    let has_settings: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='settings'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_settings {
        conn.execute_batch(
            r#"
            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: format!("Failed to create settings table: {}", e),
        })?;
    }

    Ok(())
}
