//! v001 -- Initial schema creation.
//!
//! A single key/value table: one row per persisted collection blob.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    key        TEXT PRIMARY KEY NOT NULL,   -- e.g. "clients-storage"
    blob       TEXT NOT NULL,               -- {"state": {...}, "version": 0}
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
