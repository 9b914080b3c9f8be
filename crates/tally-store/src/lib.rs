//! # tally-store
//!
//! Local, authoritative copy of every Tally entity for this device.
//!
//! Records live in memory inside [`LocalStore`]; every mutation rewrites the
//! whole collection as one JSON blob in a small SQLite key/value table, so
//! the on-disk shape is always `{"state": {"<collection>": [...]}, "version": 0}`.

pub mod backup;
pub mod blobs;
pub mod collections;
pub mod database;
pub mod logs;
pub mod migrations;
pub mod store;

mod error;

pub use backup::{BackupBundle, ImportStats};
pub use database::Database;
pub use error::{Result, StoreError};
pub use store::{LocalStore, Stored};
