//! Raw key/value access to the `collections` table.

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Read the blob stored under `key`, if any.
    pub fn read_blob(&self, key: &str) -> Result<Option<String>> {
        let blob = self
            .conn()
            .query_row(
                "SELECT blob FROM collections WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob)
    }

    /// Insert or overwrite the blob stored under `key`.
    pub fn write_blob(&self, key: &str, blob: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO collections (key, blob, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
            params![key, blob, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete the blob under `key`. Returns `true` if a row was deleted.
    pub fn delete_blob(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM collections WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}
