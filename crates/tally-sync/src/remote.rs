//! The contract every remote document store implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use tally_shared::Collection;

use crate::error::RemoteError;

/// A document as stored remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    /// Document key, `"{tenantId}_{entityId}"`.
    pub id: String,
    /// JSON object with the entity fields plus `tenantId` and `updatedAt`.
    pub data: Value,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: RemoteDocument,
}

/// One delivery from a change feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// The snapshot reflects writes made by this device that the backend
    /// has not acknowledged yet.
    pub has_pending_writes: bool,
    pub changes: Vec<DocChange>,
}

/// Live change feed of one collection. Dropping the receiver unsubscribes.
pub type ChangeFeed = mpsc::UnboundedReceiver<Result<Snapshot, RemoteError>>;

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Write `data` under `collection/doc_id`. With `merge` the fields are
    /// merged into an existing document, otherwise it is replaced. The
    /// backend stamps `updatedAt` with its own clock and returns that time.
    async fn set_document(
        &self,
        collection: Collection,
        doc_id: &str,
        data: Value,
        merge: bool,
    ) -> Result<DateTime<Utc>, RemoteError>;

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<(), RemoteError>;

    /// Every document whose `tenantId` equals `tenant_id`.
    async fn query_by_tenant(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError>;

    /// Subscribe to changes of the tenant's documents. The first snapshot
    /// carries the full current state as `Added` changes.
    async fn subscribe(&self, collection: Collection, tenant_id: &str) -> Result<ChangeFeed, RemoteError>;
}
