//! Schema migrations, tracked through `PRAGMA user_version`.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

const CURRENT_VERSION: u32 = 1;

/// Bring `conn` up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "Checking collections schema"
    );

    if current < 1 {
        tracing::info!(migration = "v001_initial", "Creating collections table");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
