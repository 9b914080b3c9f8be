//! Reconciliation engine: initial push-then-pull per collection, merge,
//! and the live listeners that keep the local store current afterwards.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::watch;

use tally_shared::{status, Client, Collection, LogEntry, Record, Server};
use tally_store::store::Stored;
use tally_store::LocalStore;

use crate::error::{ErrorClass, Result, SyncError};
use crate::listener::{self, ListenerContext, Listeners};
use crate::merge::merge_by_id;
use crate::replica::ReplicaClient;

/// The local store as shared between commands, the engine and listeners.
pub type SharedStore = Arc<Mutex<LocalStore>>;

/// Invoked on every status transition.
pub type StatusCallback = Arc<dyn Fn(SyncStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Synced,
    Offline,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes status to watchers and the optional callback.
#[derive(Clone)]
pub(crate) struct StatusReporter {
    tx: Arc<watch::Sender<SyncStatus>>,
    callback: Option<StatusCallback>,
}

impl StatusReporter {
    pub(crate) fn set(&self, status: SyncStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Sync status changed");
        }
        if let Some(callback) = &self.callback {
            callback(status);
        }
    }
}

pub struct ReconciliationEngine {
    store: SharedStore,
    replica: ReplicaClient,
    status: StatusReporter,
    status_rx: watch::Receiver<SyncStatus>,
    listeners: Mutex<Listeners>,
}

impl ReconciliationEngine {
    pub fn new(store: SharedStore, replica: ReplicaClient) -> Self {
        let (tx, status_rx) = watch::channel(SyncStatus::Idle);
        Self {
            store,
            replica,
            status: StatusReporter {
                tx: Arc::new(tx),
                callback: None,
            },
            status_rx,
            listeners: Mutex::new(Listeners::default()),
        }
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status.callback = Some(callback);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn replica(&self) -> &ReplicaClient {
        &self.replica
    }

    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Number of live listeners still running.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Run a full sync of every collection and install listeners.
    ///
    /// Never fails: the outcome is reported as a status, and the local
    /// store is only replaced after a complete fetch and merge. A call made
    /// while another sync is running returns the current status untouched.
    pub async fn initialize(&self) -> SyncStatus {
        if !self.replica.is_available() {
            self.stop_listeners();
            tracing::info!(
                configured = self.replica.is_configured(),
                "Remote unavailable, working locally"
            );
            self.status.set(SyncStatus::Offline);
            return SyncStatus::Offline;
        }

        let Some(_guard) = self.replica.session().try_begin_sync() else {
            tracing::debug!("Sync already in progress");
            return self.status();
        };

        self.status.set(SyncStatus::Syncing);
        let outcome = match self.run().await {
            Ok(()) => SyncStatus::Synced,
            Err(e) => match e.class() {
                ErrorClass::Unrecognized => {
                    tracing::error!(error = %e, "Sync failed");
                    SyncStatus::Error
                }
                ErrorClass::Transient | ErrorClass::QuotaExhausted => {
                    tracing::warn!(error = %e, "Sync degraded to offline");
                    SyncStatus::Offline
                }
            },
        };
        self.status.set(outcome);
        outcome
    }

    /// Tear down listeners and sync again, e.g. after the network returns.
    pub async fn reconnect(&self) -> SyncStatus {
        self.stop_listeners();
        self.initialize().await
    }

    pub fn shutdown(&self) {
        self.stop_listeners();
        tracing::debug!("Sync engine stopped");
    }

    async fn run(&self) -> Result<()> {
        self.stop_listeners();

        self.sync_collection::<Client>().await?;
        self.sync_collection::<Server>().await?;
        self.sync_collection::<LogEntry>().await?;

        if self.replica.is_available() {
            self.install_listeners().await?;
        }
        Ok(())
    }

    async fn sync_collection<T: Stored>(&self) -> Result<()> {
        let collection = T::COLLECTION;
        let pending: Vec<T> = self.snapshot::<T>()?.into_iter().filter(|r| r.needs_push()).collect();

        let push_succeeded = self.push_all(&pending).await;

        let mut remote = self.replica.query_all::<T>().await?;
        let today = status::today();
        for record in &mut remote {
            record.on_pulled(today);
        }

        let merged = self.merge_into_store(remote, push_succeeded)?;
        tracing::info!(
            %collection,
            pushed = pending.len(),
            push_succeeded,
            merged,
            "Collection synced"
        );
        Ok(())
    }

    /// Merge-write `records` concurrently. `true` only if all succeeded.
    async fn push_all<T: Record>(&self, records: &[T]) -> bool {
        let results = join_all(records.iter().map(|r| self.replica.update(r))).await;
        let failed: Vec<_> = results.into_iter().filter_map(|r| r.err()).collect();
        if let Some(first) = failed.first() {
            tracing::warn!(
                collection = %T::COLLECTION,
                failed = failed.len(),
                total = records.len(),
                error = %first,
                "Push incomplete"
            );
        }
        failed.is_empty()
    }

    fn snapshot<T: Stored>(&self) -> Result<Vec<T>> {
        let store = self.store.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(store.all::<T>().to_vec())
    }

    // Merged against the store as it is now, so edits made while the
    // remote calls were in flight are not dropped.
    fn merge_into_store<T: Stored>(&self, remote: Vec<T>, push_succeeded: bool) -> Result<usize> {
        let mut store = self.store.lock().map_err(|_| SyncError::LockPoisoned)?;
        let merged = merge_by_id(store.all::<T>().to_vec(), remote, push_succeeded);
        let total = merged.len();
        store.replace_all(merged)?;
        Ok(total)
    }

    async fn install_listeners(&self) -> Result<()> {
        let clients = self.replica.subscribe(Collection::Clients).await?;
        let servers = self.replica.subscribe(Collection::Servers).await?;
        let logs = self.replica.subscribe(Collection::Logs).await?;

        let ctx = ListenerContext {
            store: Arc::clone(&self.store),
            replica: self.replica.clone(),
            status: self.status.clone(),
        };
        let mut fresh = Listeners::default();
        listener::spawn::<Client>(&mut fresh, clients, ctx.clone());
        listener::spawn::<Server>(&mut fresh, servers, ctx.clone());
        listener::spawn::<LogEntry>(&mut fresh, logs, ctx);

        let mut listeners = self.listeners.lock().map_err(|_| SyncError::LockPoisoned)?;
        *listeners = fresh;
        tracing::debug!("Live listeners installed");
        Ok(())
    }

    fn stop_listeners(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.stop_all();
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}
