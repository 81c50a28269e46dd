//! Cache database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Synthesized phrase audio, addressed by sha256(voice, text)
        CREATE TABLE IF NOT EXISTS audio_cache (
            key TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            voice TEXT NOT NULL,
            audio BLOB NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_audio_cache_created ON audio_cache(created_at);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated cache schema to v1");
    Ok(())
}
