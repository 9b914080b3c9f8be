//! Firestore REST v1 backend.
//!
//! Writes go through `documents:commit` so the `updatedAt` field can be set
//! to the server's request time. There is no streaming listen over REST;
//! change feeds poll `documents:runQuery` and diff successive results by
//! document update time, dropping changes caused by this client's writes.

pub mod codec;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use tally_shared::Collection;

use crate::error::{ErrorClass, RemoteError};
use crate::remote::{ChangeFeed, ChangeKind, DocChange, RemoteBackend, RemoteDocument, Snapshot};

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";

const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    pub base_url: String,
    /// Interval between change-feed polls.
    pub poll_interval: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(15),
        }
    }

    /// Resource name of the database's document root.
    fn documents_name(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn documents_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.documents_name())
    }

    fn document_name(&self, collection: Collection, doc_id: &str) -> String {
        format!("{}/{}/{}", self.documents_name(), collection.remote_name(), doc_id)
    }
}

/// Document times of this client's own writes, keyed by resource name.
/// `None` marks a delete.
type OwnWrites = HashMap<String, Option<DateTime<Utc>>>;

#[derive(Clone)]
pub struct FirestoreRest {
    http: reqwest::Client,
    config: FirestoreConfig,
    own_writes: Arc<Mutex<OwnWrites>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<WriteResult>,
    commit_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResult {
    update_time: Option<String>,
    #[serde(default)]
    transform_results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryItem {
    document: Option<FsDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: String,
}

impl FirestoreRest {
    pub fn new(config: FirestoreConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            own_writes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn remember_write(&self, name: String, at: Option<DateTime<Utc>>) {
        if let Ok(mut own) = self.own_writes.lock() {
            own.insert(name, at);
        }
    }

    /// Consume the record of an own write to `name` at `at`. Each write is
    /// matched at most once, so the map only holds writes not yet seen by a
    /// poller.
    fn claim_own(&self, name: &str, at: Option<DateTime<Utc>>) -> bool {
        let Ok(mut own) = self.own_writes.lock() else {
            return false;
        };
        if own.get(name).is_some_and(|t| *t == at) {
            own.remove(name);
            true
        } else {
            false
        }
    }

    /// Partition changes into `(own, foreign)`, claiming the own writes.
    fn split_own(&self, collection: Collection, changes: Vec<DocChange>) -> (Vec<DocChange>, Vec<DocChange>) {
        changes.into_iter().partition(|c| {
            self.claim_own(&self.config.document_name(collection, &c.doc.id), c.doc.update_time)
        })
    }

    async fn commit(&self, write: Value) -> Result<CommitResponse, RemoteError> {
        let url = format!("{}:commit", self.config.documents_url());
        let response = self
            .http
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&json!({ "writes": [write] }))
            .send()
            .await
            .map_err(map_transport)?;
        let response = check(response).await?;
        response.json().await.map_err(map_transport)
    }

    async fn run_query(&self, collection: Collection, tenant_id: &str) -> Result<Vec<FsDocument>, RemoteError> {
        let url = format!("{}:runQuery", self.config.documents_url());
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection.remote_name() }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "tenantId" },
                        "op": "EQUAL",
                        "value": { "stringValue": tenant_id }
                    }
                }
            }
        });
        let response = self
            .http
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let items: Vec<QueryItem> = check(response).await?.json().await.map_err(map_transport)?;
        Ok(items.into_iter().filter_map(|i| i.document).collect())
    }

    async fn poll_loop(
        self,
        collection: Collection,
        tenant_id: String,
        mut known: HashMap<String, RemoteDocument>,
        tx: mpsc::UnboundedSender<Result<Snapshot, RemoteError>>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        'poll: loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            match self.query_by_tenant(collection, &tenant_id).await {
                Ok(docs) => {
                    let (own, foreign) = self.split_own(collection, diff_documents(&mut known, docs));
                    // Own writes go out like local echoes: flagged as pending.
                    for (has_pending_writes, changes) in [(false, foreign), (true, own)] {
                        if changes.is_empty() {
                            continue;
                        }
                        let snapshot = Snapshot {
                            has_pending_writes,
                            changes,
                        };
                        if tx.send(Ok(snapshot)).is_err() {
                            break 'poll;
                        }
                    }
                }
                Err(e) => {
                    let fatal = e.class() == ErrorClass::QuotaExhausted;
                    if tx.send(Err(e)).is_err() || fatal {
                        break;
                    }
                }
            }
        }
        tracing::debug!(%collection, "Firestore poller stopped");
    }
}

#[async_trait]
impl RemoteBackend for FirestoreRest {
    async fn set_document(
        &self,
        collection: Collection,
        doc_id: &str,
        data: Value,
        merge: bool,
    ) -> Result<DateTime<Utc>, RemoteError> {
        let Value::Object(mut fields) = data else {
            return Err(RemoteError::Other("document data must be an object".into()));
        };
        fields.remove(UPDATED_AT_FIELD);

        let name = self.config.document_name(collection, doc_id);
        let mut write = json!({
            "update": { "name": name, "fields": codec::encode_fields(&fields) },
            "updateTransforms": [{ "fieldPath": UPDATED_AT_FIELD, "setToServerValue": "REQUEST_TIME" }]
        });
        if merge {
            let paths: Vec<String> = fields.keys().map(|k| codec::field_path(k)).collect();
            write["updateMask"] = json!({ "fieldPaths": paths });
        }

        let response = self.commit(write).await?;
        let result = response.write_results.into_iter().next();
        let stamped = result
            .as_ref()
            .and_then(|r| r.transform_results.first())
            .and_then(|v| v.get("timestampValue"))
            .and_then(Value::as_str)
            .and_then(parse_time);
        let update_time = result.as_ref().and_then(|r| r.update_time.as_deref()).and_then(parse_time);

        self.remember_write(name, update_time);

        stamped
            .or(update_time)
            .or_else(|| response.commit_time.as_deref().and_then(parse_time))
            .ok_or_else(|| RemoteError::Decode("commit response without a timestamp".into()))
    }

    async fn delete_document(&self, collection: Collection, doc_id: &str) -> Result<(), RemoteError> {
        let url = format!(
            "{}/{}/{}",
            self.config.documents_url(),
            collection.remote_name(),
            doc_id
        );
        let response = self
            .http
            .delete(url)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(map_transport)?;
        check(response).await?;
        self.remember_write(self.config.document_name(collection, doc_id), None);
        Ok(())
    }

    async fn query_by_tenant(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        self.run_query(collection, tenant_id)
            .await?
            .into_iter()
            .map(to_remote_document)
            .collect()
    }

    async fn subscribe(&self, collection: Collection, tenant_id: &str) -> Result<ChangeFeed, RemoteError> {
        let docs = self.query_by_tenant(collection, tenant_id).await?;
        for doc in &docs {
            self.claim_own(&self.config.document_name(collection, &doc.id), doc.update_time);
        }
        let (tx, rx) = mpsc::unbounded_channel();

        let initial = Snapshot {
            has_pending_writes: false,
            changes: docs
                .iter()
                .cloned()
                .map(|doc| DocChange {
                    kind: ChangeKind::Added,
                    doc,
                })
                .collect(),
        };
        let _ = tx.send(Ok(initial));

        let known = docs.into_iter().map(|d| (d.id.clone(), d)).collect();
        tokio::spawn(self.clone().poll_loop(collection, tenant_id.to_string(), known, tx));
        Ok(rx)
    }
}

/// Compute the changes between the last known documents and a fresh
/// query result, updating `known` in place.
pub(crate) fn diff_documents(
    known: &mut HashMap<String, RemoteDocument>,
    current: Vec<RemoteDocument>,
) -> Vec<DocChange> {
    let mut changes = Vec::new();
    let mut next = HashMap::with_capacity(current.len());

    for doc in current {
        let kind = match known.remove(&doc.id) {
            None => Some(ChangeKind::Added),
            Some(prev) if prev.update_time != doc.update_time => Some(ChangeKind::Modified),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            changes.push(DocChange {
                kind,
                doc: doc.clone(),
            });
        }
        next.insert(doc.id.clone(), doc);
    }

    for (_, gone) in known.drain() {
        changes.push(DocChange {
            kind: ChangeKind::Removed,
            doc: RemoteDocument {
                update_time: None,
                ..gone
            },
        });
    }

    *known = next;
    changes
}

fn to_remote_document(doc: FsDocument) -> Result<RemoteDocument, RemoteError> {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Ok(RemoteDocument {
        id,
        data: codec::decode_fields(&doc.fields)?,
        update_time: doc.update_time.as_deref().and_then(parse_time),
    })
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status(status, &body))
}

fn map_status(status: StatusCode, body: &str) -> RemoteError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => (env.error.status, env.error.message),
        Err(_) => (None, body.to_string()),
    };

    match (status, code.as_deref()) {
        (StatusCode::TOO_MANY_REQUESTS, _) | (_, Some("RESOURCE_EXHAUSTED")) => RemoteError::QuotaExceeded,
        (StatusCode::SERVICE_UNAVAILABLE, _) | (_, Some("UNAVAILABLE")) => RemoteError::Unavailable(message),
        (StatusCode::GATEWAY_TIMEOUT, _) | (_, Some("DEADLINE_EXCEEDED")) => RemoteError::DeadlineExceeded,
        (StatusCode::PROXY_AUTHENTICATION_REQUIRED, _) => RemoteError::Blocked,
        _ => RemoteError::Other(format!("{status}: {message}")),
    }
}

fn map_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::DeadlineExceeded
    } else if err.is_connect() {
        RemoteError::Unavailable(err.to_string())
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Other(err.to_string())
    }
}
