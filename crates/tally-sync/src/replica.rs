//! Tenant-scoped CRUD against the remote replica, behind the quota breaker.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use tally_shared::{Collection, Record};

use crate::error::{ErrorClass, RemoteError};
use crate::remote::{ChangeFeed, RemoteBackend, RemoteDocument};
use crate::session::SyncSession;

/// What happened to the remote copy of a local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Written remotely. Deletes carry no timestamp.
    Synced { updated_at: Option<DateTime<Utc>> },
    /// No remote replica is configured.
    LocalOnly,
    /// Transient failure. The next sync will reconcile.
    Offline,
    /// The quota breaker is open (or was just tripped).
    QuotaExceeded,
    Failed(String),
}

impl PushOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    fn from_error(err: RemoteError) -> Self {
        match err {
            RemoteError::NotConfigured => Self::LocalOnly,
            RemoteError::QuotaExceeded | RemoteError::CircuitOpen => Self::QuotaExceeded,
            other if other.class() == ErrorClass::Transient => Self::Offline,
            other => Self::Failed(other.to_string()),
        }
    }
}

impl fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced { .. } => f.write_str("synced"),
            Self::LocalOnly => f.write_str("local only"),
            Self::Offline => f.write_str("offline"),
            Self::QuotaExceeded => f.write_str("quota exceeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Remote replica client.
///
/// Every operation first checks the session breaker and returns
/// [`RemoteError::CircuitOpen`] without touching the backend once it is
/// open. A [`RemoteError::QuotaExceeded`] from any operation opens it.
#[derive(Clone)]
pub struct ReplicaClient {
    backend: Option<Arc<dyn RemoteBackend>>,
    session: Arc<SyncSession>,
    tenant_id: String,
}

impl ReplicaClient {
    pub fn new(
        backend: Option<Arc<dyn RemoteBackend>>,
        session: Arc<SyncSession>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            session,
            tenant_id: tenant_id.into(),
        }
    }

    /// A client with no remote. Every operation reports `NotConfigured`.
    pub fn local_only(session: Arc<SyncSession>, tenant_id: impl Into<String>) -> Self {
        Self::new(None, session, tenant_id)
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Configured and the breaker is still closed.
    pub fn is_available(&self) -> bool {
        self.is_configured() && !self.session.is_quota_exceeded()
    }

    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn doc_id(&self, id: Uuid) -> String {
        format!("{}_{}", self.tenant_id, id)
    }

    /// Entity id encoded in a document key of this tenant.
    pub fn entity_id(&self, doc_id: &str) -> Option<Uuid> {
        doc_id
            .strip_prefix(self.tenant_id.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    /// Write a new document, replacing anything under the same key.
    pub async fn create<T: Record>(&self, record: &T) -> Result<DateTime<Utc>, RemoteError> {
        self.write(record, false, "create").await
    }

    /// Merge-write a record.
    pub async fn update<T: Record>(&self, record: &T) -> Result<DateTime<Utc>, RemoteError> {
        self.write(record, true, "update").await
    }

    pub async fn delete<T: Record>(&self, id: Uuid) -> Result<(), RemoteError> {
        let backend = self.backend()?;
        let result = backend
            .delete_document(T::COLLECTION, &self.doc_id(id))
            .await;
        self.observe("delete", result)
    }

    /// Fetch and decode every record of the tenant. Undecodable documents
    /// are skipped with a warning.
    pub async fn query_all<T: Record>(&self) -> Result<Vec<T>, RemoteError> {
        let backend = self.backend()?;
        let result = backend
            .query_by_tenant(T::COLLECTION, &self.tenant_id)
            .await;
        let docs = self.observe("query", result)?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.decode::<T>(&doc) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(collection = %T::COLLECTION, doc = %doc.id, error = %e, "Skipping remote document");
                }
            }
        }
        Ok(records)
    }

    pub async fn subscribe(&self, collection: Collection) -> Result<ChangeFeed, RemoteError> {
        let backend = self.backend()?;
        let result = backend.subscribe(collection, &self.tenant_id).await;
        self.observe("subscribe", result)
    }

    /// Merge-write a record, folding any failure into the outcome.
    pub async fn push<T: Record>(&self, record: &T) -> PushOutcome {
        let result = self.update(record).await;
        written::<T>(record.id(), result)
    }

    /// Write a newly created record, folding any failure into the outcome.
    pub async fn push_new<T: Record>(&self, record: &T) -> PushOutcome {
        let result = self.create(record).await;
        written::<T>(record.id(), result)
    }

    pub async fn push_delete<T: Record>(&self, id: Uuid) -> PushOutcome {
        match self.delete::<T>(id).await {
            Ok(()) => PushOutcome::Synced { updated_at: None },
            Err(e) => {
                log_push_failure(T::COLLECTION, id, &e);
                PushOutcome::from_error(e)
            }
        }
    }

    /// Decode a remote document into a record, stamping the backend's
    /// update time when the document lacks `updatedAt`.
    pub fn decode<T: Record>(&self, doc: &RemoteDocument) -> Result<T, RemoteError> {
        let mut record: T = serde_json::from_value(doc.data.clone())
            .map_err(|e| RemoteError::Decode(format!("{}: {e}", doc.id)))?;
        if record.updated_at().is_none() {
            if let Some(at) = doc.update_time {
                record.set_updated_at(at);
            }
        }
        Ok(record)
    }

    /// Record an observed failure: quota errors open the breaker.
    pub fn observe<T>(&self, operation: &str, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        if let Err(RemoteError::QuotaExceeded) = &result {
            self.session.trip_quota(operation);
        }
        result
    }

    async fn write<T: Record>(&self, record: &T, merge: bool, operation: &str) -> Result<DateTime<Utc>, RemoteError> {
        let backend = self.backend()?;
        let data = self.encode(record)?;
        let result = backend
            .set_document(T::COLLECTION, &self.doc_id(record.id()), data, merge)
            .await;
        self.observe(operation, result)
    }

    fn backend(&self) -> Result<&Arc<dyn RemoteBackend>, RemoteError> {
        let backend = self.backend.as_ref().ok_or(RemoteError::NotConfigured)?;
        if self.session.is_quota_exceeded() {
            return Err(RemoteError::CircuitOpen);
        }
        Ok(backend)
    }

    // `updatedAt` is always assigned by the backend.
    fn encode<T: Record>(&self, record: &T) -> Result<Value, RemoteError> {
        let mut data = serde_json::to_value(record).map_err(|e| RemoteError::Other(e.to_string()))?;
        let Value::Object(fields) = &mut data else {
            return Err(RemoteError::Other(format!(
                "{} record did not serialize to an object",
                T::COLLECTION
            )));
        };
        fields.remove("updatedAt");
        fields.insert("tenantId".into(), Value::String(self.tenant_id.clone()));
        Ok(data)
    }
}

fn written<T: Record>(id: Uuid, result: Result<DateTime<Utc>, RemoteError>) -> PushOutcome {
    match result {
        Ok(at) => PushOutcome::Synced {
            updated_at: Some(at),
        },
        Err(e) => {
            log_push_failure(T::COLLECTION, id, &e);
            PushOutcome::from_error(e)
        }
    }
}

fn log_push_failure(collection: Collection, id: Uuid, err: &RemoteError) {
    match err.class() {
        ErrorClass::Unrecognized => {
            tracing::error!(%collection, %id, error = %err, "Remote push failed");
        }
        _ => {
            tracing::warn!(%collection, %id, error = %err, "Remote push skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRemote, Operation};
    use tally_shared::{Server, ServerDraft};

    fn server(name: &str) -> Server {
        Server::new(ServerDraft {
            name: name.into(),
            base_cost: 12.5,
        })
    }

    fn replica(remote: &MemoryRemote) -> ReplicaClient {
        ReplicaClient::new(Some(Arc::new(remote.clone())), SyncSession::new(), "default-user")
    }

    #[tokio::test]
    async fn documents_are_tenant_scoped() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        let s = server("alpha");

        client.create(&s).await.unwrap();

        let docs = remote.documents(Collection::Servers);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, format!("default-user_{}", s.id));
        assert_eq!(docs[0].data["tenantId"], "default-user");
        assert!(docs[0].data.get("updatedAt").is_some());

        let other = ReplicaClient::new(Some(Arc::new(remote.clone())), SyncSession::new(), "someone-else");
        assert!(other.query_all::<Server>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_are_stamped_by_the_backend() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        let s = server("alpha");

        let at = client.update(&s).await.unwrap();
        let pulled = client.query_all::<Server>().await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].updated_at, Some(at));
        assert_eq!(pulled[0].name, "alpha");
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        let mut s = server("alpha");
        client.create(&s).await.unwrap();

        s.base_cost = 20.0;
        client.update(&s).await.unwrap();

        let pulled = client.query_all::<Server>().await.unwrap();
        assert_eq!(pulled[0].base_cost, 20.0);
    }

    #[tokio::test]
    async fn quota_error_opens_breaker_for_every_operation() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        remote.fail_next(Operation::Set, RemoteError::QuotaExceeded);

        let s = server("alpha");
        assert_eq!(client.update(&s).await, Err(RemoteError::QuotaExceeded));
        assert!(client.session().is_quota_exceeded());
        let calls_after_trip = remote.total_calls();

        assert_eq!(client.create(&s).await, Err(RemoteError::CircuitOpen));
        assert_eq!(client.delete::<Server>(s.id).await, Err(RemoteError::CircuitOpen));
        assert_eq!(
            client.query_all::<Server>().await,
            Err(RemoteError::CircuitOpen)
        );
        assert!(matches!(
            client.subscribe(Collection::Servers).await,
            Err(RemoteError::CircuitOpen)
        ));
        assert_eq!(client.push(&s).await, PushOutcome::QuotaExceeded);

        assert_eq!(remote.total_calls(), calls_after_trip);
    }

    #[tokio::test]
    async fn transient_errors_leave_breaker_closed() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        remote.fail_next(Operation::Set, RemoteError::Unavailable("offline".into()));

        assert_eq!(client.push(&server("alpha")).await, PushOutcome::Offline);
        assert!(!client.session().is_quota_exceeded());
        assert!(client.push(&server("beta")).await.is_synced());
    }

    #[tokio::test]
    async fn unconfigured_client_is_local_only() {
        let client = ReplicaClient::local_only(SyncSession::new(), "default-user");
        assert!(!client.is_configured());
        assert_eq!(client.push(&server("alpha")).await, PushOutcome::LocalOnly);
        assert_eq!(
            client.query_all::<Server>().await,
            Err(RemoteError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped() {
        let remote = MemoryRemote::new();
        let client = replica(&remote);
        client.create(&server("alpha")).await.unwrap();
        remote
            .set_document(
                Collection::Servers,
                "default-user_garbage",
                serde_json::json!({"tenantId": "default-user", "name": 3}),
                false,
            )
            .await
            .unwrap();

        assert_eq!(client.query_all::<Server>().await.unwrap().len(), 1);
    }

    #[test]
    fn entity_id_round_trips_doc_id() {
        let client = ReplicaClient::local_only(SyncSession::new(), "default-user");
        let id = Uuid::new_v4();
        assert_eq!(client.entity_id(&client.doc_id(id)), Some(id));
        assert_eq!(client.entity_id(&format!("other_{id}")), None);
    }
}
