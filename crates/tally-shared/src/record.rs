//! The [`Record`] trait ties an entity type to its collection name, both in
//! the local blob store and in the remote document store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// The three synchronised collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Clients,
    Servers,
    Logs,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Clients, Self::Servers, Self::Logs];

    /// Name of the remote document collection.
    pub fn remote_name(&self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Servers => "servers",
            Self::Logs => "logs",
        }
    }

    /// Key of the local persisted blob.
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Clients => "clients-storage",
            Self::Servers => "servers-storage",
            Self::Logs => "logs-storage",
        }
    }

    /// Field under `state` holding the record array inside the blob.
    pub fn state_field(&self) -> &'static str {
        self.remote_name()
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.remote_name())
    }
}

/// A uniquely identified entity that is stored locally and mirrored remotely.
pub trait Record:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static
{
    const COLLECTION: Collection;

    fn id(&self) -> Uuid;

    /// Server-assigned write timestamp. Only meaningful for merge decisions.
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Hook run on every record decoded from the remote replica.
    fn on_pulled(&mut self, _today: NaiveDate) {}

    /// Whether a full sync run has to write this record to the replica.
    fn needs_push(&self) -> bool {
        true
    }
}
