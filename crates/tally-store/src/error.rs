use thiserror::Error;

/// Errors raised while loading or persisting the local collections.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory and no explicit one configured.
    #[error("Could not determine the data directory for tally.db")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A collection blob or backup document is not valid JSON for its type.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A backup document lacks the `clients` / `servers` arrays.
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
