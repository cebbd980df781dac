//! Table layout and connection setup

use rusqlite::Connection;
use std::time::Duration;

pub(crate) const SCHEMA_VERSION: i64 = 1;

/// Columns in the order every `SELECT` returns them
pub(crate) const RECORD_COLUMNS: &str =
    "id, prompt, enhanced_prompt, image_path, model_path, created_at, metadata";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt TEXT NOT NULL,
    enhanced_prompt TEXT,
    image_path TEXT,
    model_path TEXT,
    created_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_generations_created_at ON generations(created_at);
"#;

/// Apply pragmas and create the schema if missing.
///
/// The table shape matches databases written by earlier versions of the app,
/// so an existing `generations.db` opens without conversion.
pub(crate) fn migrate(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    if file_backed {
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    }

    conn.execute_batch(CREATE_TABLES)?;

    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        tracing::debug!(from = version, to = SCHEMA_VERSION, "Upgrading schema version");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}
