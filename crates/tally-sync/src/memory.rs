//! In-process [`RemoteBackend`].
//!
//! Handles created with [`MemoryRemote::peer`] share the same documents but
//! act as separate devices: a snapshot caused by a handle's own write is
//! delivered to that handle's subscribers with `has_pending_writes` set,
//! while other handles see it as a remote change. Call counters and
//! injected faults make breaker and failure paths testable.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use tally_shared::Collection;

use crate::error::RemoteError;
use crate::remote::{ChangeFeed, ChangeKind, DocChange, RemoteBackend, RemoteDocument, Snapshot};

/// Backend operation, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Set,
    Delete,
    Query,
    Subscribe,
}

#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
    origin: u32,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<Collection, BTreeMap<String, RemoteDocument>>,
    subscribers: Vec<Subscriber>,
    calls: HashMap<Operation, usize>,
    one_shot: HashMap<Operation, VecDeque<RemoteError>>,
    sticky: HashMap<Operation, RemoteError>,
    last_stamp: Option<DateTime<Utc>>,
    next_origin: u32,
}

struct Subscriber {
    collection: Collection,
    tenant_id: String,
    origin: u32,
    tx: mpsc::UnboundedSender<Result<Snapshot, RemoteError>>,
}

impl Inner {
    /// Count the call, then return the injected fault for it, if any.
    fn enter(&mut self, op: Operation) -> Result<(), RemoteError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(err) = self.one_shot.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match self.sticky.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    // Strictly increasing so last-write ordering is observable in tests.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(at);
        at
    }

    fn notify(&mut self, collection: Collection, writer: u32, change: DocChange) {
        let tenant = change.doc.data.get("tenantId").and_then(Value::as_str).map(str::to_owned);
        self.subscribers.retain(|sub| {
            if sub.collection != collection || tenant.as_deref() != Some(sub.tenant_id.as_str()) {
                return !sub.tx.is_closed();
            }
            let snapshot = Snapshot {
                has_pending_writes: sub.origin == writer,
                changes: vec![change.clone()],
            };
            sub.tx.send(Ok(snapshot)).is_ok()
        });
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_origin: 1,
                ..Inner::default()
            })),
            origin: 0,
        }
    }

    /// Another device sharing this store.
    pub fn peer(&self) -> Self {
        let mut inner = self.lock();
        let origin = inner.next_origin;
        inner.next_origin += 1;
        Self {
            inner: Arc::clone(&self.inner),
            origin,
        }
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: Operation, err: RemoteError) {
        self.lock().one_shot.entry(op).or_default().push_back(err);
    }

    /// Fail every call of `op` until [`MemoryRemote::clear_faults`].
    pub fn fail_always(&self, op: Operation, err: RemoteError) {
        self.lock().sticky.insert(op, err);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.one_shot.clear();
        inner.sticky.clear();
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Every stored document of a collection, across tenants.
    pub fn documents(&self, collection: Collection) -> Vec<RemoteDocument> {
        self.lock()
            .docs
            .get(&collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Push an error into every open feed of `collection`.
    pub fn broadcast_error(&self, collection: Collection, err: RemoteError) {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| {
            if sub.collection != collection {
                return !sub.tx.is_closed();
            }
            sub.tx.send(Err(err.clone())).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }

    // Nothing panics while the lock is held, so poisoning cannot happen;
    // recover the guard anyway rather than propagate a panic into tests.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn set_document(
        &self,
        collection: Collection,
        doc_id: &str,
        data: Value,
        merge: bool,
    ) -> Result<DateTime<Utc>, RemoteError> {
        let Value::Object(fields) = data else {
            return Err(RemoteError::Other("document data must be an object".into()));
        };

        let mut inner = self.lock();
        inner.enter(Operation::Set)?;
        let at = inner.stamp();

        let docs = inner.docs.entry(collection).or_default();
        let existing = docs.remove(doc_id);
        let kind = if existing.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };

        let mut merged = match existing {
            Some(RemoteDocument {
                data: Value::Object(old),
                ..
            }) if merge => old,
            _ => serde_json::Map::new(),
        };
        merged.extend(fields);
        merged.insert("updatedAt".into(), serde_json::json!(at));

        let doc = RemoteDocument {
            id: doc_id.to_string(),
            data: Value::Object(merged),
            update_time: Some(at),
        };
        docs.insert(doc_id.to_string(), doc.clone());

        inner.notify(collection, self.origin, DocChange { kind, doc });
        Ok(at)
    }

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.enter(Operation::Delete)?;

        let removed = inner
            .docs
            .get_mut(&collection)
            .and_then(|docs| docs.remove(doc_id));
        if let Some(doc) = removed {
            inner.notify(
                collection,
                self.origin,
                DocChange {
                    kind: ChangeKind::Removed,
                    doc,
                },
            );
        }
        Ok(())
    }

    async fn query_by_tenant(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let mut inner = self.lock();
        inner.enter(Operation::Query)?;
        Ok(tenant_docs(&inner, collection, tenant_id))
    }

    async fn subscribe(&self, collection: Collection, tenant_id: &str) -> Result<ChangeFeed, RemoteError> {
        let mut inner = self.lock();
        inner.enter(Operation::Subscribe)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = Snapshot {
            has_pending_writes: false,
            changes: tenant_docs(&inner, collection, tenant_id)
                .into_iter()
                .map(|doc| DocChange {
                    kind: ChangeKind::Added,
                    doc,
                })
                .collect(),
        };
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(Ok(initial));

        inner.subscribers.push(Subscriber {
            collection,
            tenant_id: tenant_id.to_string(),
            origin: self.origin,
            tx,
        });
        Ok(rx)
    }
}

fn tenant_docs(inner: &Inner, collection: Collection, tenant_id: &str) -> Vec<RemoteDocument> {
    inner
        .docs
        .get(&collection)
        .map(|docs| {
            docs.values()
                .filter(|doc| doc.data.get("tenantId").and_then(Value::as_str) == Some(tenant_id))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(name: &str) -> Value {
        json!({"tenantId": "t", "name": name})
    }

    #[tokio::test]
    async fn merge_keeps_unwritten_fields() {
        let remote = MemoryRemote::new();
        remote
            .set_document(Collection::Servers, "t_1", json!({"tenantId": "t", "name": "a", "baseCost": 1.0}), false)
            .await
            .unwrap();
        remote
            .set_document(Collection::Servers, "t_1", json!({"tenantId": "t", "name": "b"}), true)
            .await
            .unwrap();

        let docs = remote.query_by_tenant(Collection::Servers, "t").await.unwrap();
        assert_eq!(docs[0].data["name"], "b");
        assert_eq!(docs[0].data["baseCost"], 1.0);

        remote
            .set_document(Collection::Servers, "t_1", json!({"tenantId": "t", "name": "c"}), false)
            .await
            .unwrap();
        let docs = remote.query_by_tenant(Collection::Servers, "t").await.unwrap();
        assert!(docs[0].data.get("baseCost").is_none());
    }

    #[tokio::test]
    async fn stamps_increase() {
        let remote = MemoryRemote::new();
        let a = remote.set_document(Collection::Logs, "t_1", doc("a"), true).await.unwrap();
        let b = remote.set_document(Collection::Logs, "t_2", doc("b"), true).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn first_snapshot_is_current_state() {
        let remote = MemoryRemote::new();
        remote.set_document(Collection::Clients, "t_1", doc("a"), true).await.unwrap();

        let mut feed = remote.subscribe(Collection::Clients, "t").await.unwrap();
        let first = feed.recv().await.unwrap().unwrap();
        assert!(!first.has_pending_writes);
        assert_eq!(first.changes.len(), 1);
        assert_eq!(first.changes[0].kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn own_writes_are_pending_peer_writes_are_not() {
        let device = MemoryRemote::new();
        let peer = device.peer();

        let mut feed = device.subscribe(Collection::Clients, "t").await.unwrap();
        feed.recv().await.unwrap().unwrap();

        device.set_document(Collection::Clients, "t_1", doc("a"), true).await.unwrap();
        let own = feed.recv().await.unwrap().unwrap();
        assert!(own.has_pending_writes);

        peer.set_document(Collection::Clients, "t_1", doc("b"), true).await.unwrap();
        let foreign = feed.recv().await.unwrap().unwrap();
        assert!(!foreign.has_pending_writes);
        assert_eq!(foreign.changes[0].kind, ChangeKind::Modified);

        peer.delete_document(Collection::Clients, "t_1").await.unwrap();
        let removed = feed.recv().await.unwrap().unwrap();
        assert_eq!(removed.changes[0].kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn other_tenants_are_invisible() {
        let remote = MemoryRemote::new();
        let mut feed = remote.subscribe(Collection::Clients, "t").await.unwrap();
        feed.recv().await.unwrap().unwrap();

        remote
            .set_document(Collection::Clients, "x_1", json!({"tenantId": "x"}), true)
            .await
            .unwrap();
        assert!(remote.query_by_tenant(Collection::Clients, "t").await.unwrap().is_empty());
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn faults_and_call_counts() {
        let remote = MemoryRemote::new();
        remote.fail_next(Operation::Query, RemoteError::DeadlineExceeded);

        assert_eq!(
            remote.query_by_tenant(Collection::Clients, "t").await,
            Err(RemoteError::DeadlineExceeded)
        );
        assert!(remote.query_by_tenant(Collection::Clients, "t").await.is_ok());
        assert_eq!(remote.calls(Operation::Query), 2);

        remote.fail_always(Operation::Delete, RemoteError::Blocked);
        assert!(remote.delete_document(Collection::Clients, "t_1").await.is_err());
        assert!(remote.delete_document(Collection::Clients, "t_1").await.is_err());
        remote.clear_faults();
        assert!(remote.delete_document(Collection::Clients, "t_1").await.is_ok());
        assert_eq!(remote.total_calls(), 5);
    }

    #[tokio::test]
    async fn dropped_feeds_are_pruned() {
        let remote = MemoryRemote::new();
        let feed = remote.subscribe(Collection::Servers, "t").await.unwrap();
        assert_eq!(remote.subscriber_count(), 1);
        drop(feed);
        assert_eq!(remote.subscriber_count(), 0);
    }
}
