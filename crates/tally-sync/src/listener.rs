//! Live change listeners feeding remote changes into the local store.

use chrono::NaiveDate;
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tally_shared::{status, Record};
use tally_store::store::Stored;

use crate::engine::{SharedStore, StatusReporter, SyncStatus};
use crate::error::{ErrorClass, Result, SyncError};
use crate::merge::{apply_changes, RecordChange};
use crate::remote::{ChangeFeed, ChangeKind, Snapshot};
use crate::replica::ReplicaClient;

/// Decides which snapshots of a feed are applied.
///
/// The first delivery is the state the initial sync just merged and is
/// dropped. After that only snapshots with changes that did not originate
/// from this device's own pending writes get through, so local writes do
/// not echo back into the store.
#[derive(Debug, Default)]
pub struct SnapshotGate {
    primed: bool,
}

impl SnapshotGate {
    pub fn admit(&mut self, snapshot: &Snapshot) -> bool {
        if !self.primed {
            self.primed = true;
            return false;
        }
        !snapshot.has_pending_writes && !snapshot.changes.is_empty()
    }
}

/// Everything a listener task needs.
#[derive(Clone)]
pub(crate) struct ListenerContext {
    pub store: SharedStore,
    pub replica: ReplicaClient,
    pub status: StatusReporter,
}

/// Handles of the running listener tasks. Dropping the set stops them.
#[derive(Default)]
pub struct Listeners {
    handles: Vec<JoinHandle<()>>,
}

impl Listeners {
    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stop_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Spawn a listener for `T` onto `listeners`.
pub(crate) fn spawn<T: Stored>(listeners: &mut Listeners, feed: ChangeFeed, ctx: ListenerContext) {
    listeners.push(tokio::spawn(run::<T>(feed, ctx)));
}

async fn run<T: Stored>(mut feed: ChangeFeed, ctx: ListenerContext) {
    let collection = T::COLLECTION;
    let mut gate = SnapshotGate::default();
    tracing::debug!(%collection, "Listener started");

    while let Some(delivery) = feed.recv().await {
        match delivery {
            Ok(snapshot) => {
                if !gate.admit(&snapshot) {
                    tracing::trace!(
                        %collection,
                        pending = snapshot.has_pending_writes,
                        changes = snapshot.changes.len(),
                        "Snapshot ignored"
                    );
                    continue;
                }
                let changes = decode_changes::<T>(&ctx.replica, snapshot, status::today());
                match apply(&ctx.store, changes) {
                    Ok(total) => tracing::debug!(%collection, records = total, "Remote changes applied"),
                    Err(e) => {
                        tracing::error!(%collection, error = %e, "Failed to apply remote changes");
                        ctx.status.set(SyncStatus::Error);
                    }
                }
            }
            Err(e) => {
                let _ = ctx.replica.observe("listen", Err::<(), _>(e.clone()));
                match e.class() {
                    ErrorClass::Unrecognized => {
                        tracing::error!(%collection, error = %e, "Listener error");
                        ctx.status.set(SyncStatus::Error);
                    }
                    _ => {
                        tracing::warn!(%collection, error = %e, "Listener degraded to offline");
                        ctx.status.set(SyncStatus::Offline);
                    }
                }
            }
        }
    }

    tracing::debug!(%collection, "Change feed closed");
}

/// Decode a snapshot into record changes, re-deriving pulled records.
pub fn decode_changes<T: Record>(replica: &ReplicaClient, snapshot: Snapshot, today: NaiveDate) -> Vec<RecordChange<T>> {
    let mut out = Vec::with_capacity(snapshot.changes.len());
    for change in snapshot.changes {
        match change.kind {
            ChangeKind::Removed => {
                let id = replica.entity_id(&change.doc.id).or_else(|| {
                    change
                        .doc
                        .data
                        .get("id")
                        .and_then(Value::as_str)
                        .and_then(|s| Uuid::parse_str(s).ok())
                });
                match id {
                    Some(id) => out.push(RecordChange::Remove(id)),
                    None => tracing::warn!(doc = %change.doc.id, "Removed document has no entity id"),
                }
            }
            ChangeKind::Added | ChangeKind::Modified => match replica.decode::<T>(&change.doc) {
                Ok(mut record) => {
                    record.on_pulled(today);
                    out.push(RecordChange::Upsert(record));
                }
                Err(e) => tracing::warn!(doc = %change.doc.id, error = %e, "Skipping remote change"),
            },
        }
    }
    out
}

fn apply<T: Stored>(store: &SharedStore, changes: Vec<RecordChange<T>>) -> Result<usize> {
    let mut store = store.lock().map_err(|_| SyncError::LockPoisoned)?;
    let merged = apply_changes(store.all::<T>().to_vec(), changes);
    let total = merged.len();
    store.replace_all(merged)?;
    Ok(total)
}
