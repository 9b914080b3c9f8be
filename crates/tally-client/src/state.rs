//! Application state shared by every command.

use std::sync::{Arc, Mutex, MutexGuard};

use tally_store::{Database, LocalStore};
use tally_sync::{
    FirestoreRest, ReconciliationEngine, RemoteBackend, ReplicaClient, SharedStore, SyncSession,
};

use crate::config::AppConfig;
use crate::error::{CommandError, Result};

/// Central application state.
///
/// Holds the local store, the remote replica client and the
/// reconciliation engine, all sharing one [`SyncSession`].
pub struct AppState {
    pub store: SharedStore,
    pub replica: ReplicaClient,
    pub engine: Arc<ReconciliationEngine>,
}

impl AppState {
    /// Open the local database and connect the configured remote, if any.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in_dir(dir)?,
            None => Database::new()?,
        };
        let backend = config.firestore().map(|fs| {
            tracing::info!(project = %fs.project_id, "Firestore replica configured");
            Arc::new(FirestoreRest::new(fs)) as Arc<dyn RemoteBackend>
        });
        if backend.is_none() {
            tracing::info!("No remote replica configured, running local-only");
        }
        Self::with_backend(LocalStore::open(db)?, backend, &config.tenant_id)
    }

    pub fn with_backend(
        store: LocalStore,
        backend: Option<Arc<dyn RemoteBackend>>,
        tenant_id: &str,
    ) -> Result<Self> {
        let store: SharedStore = Arc::new(Mutex::new(store));
        let replica = ReplicaClient::new(backend, SyncSession::new(), tenant_id);
        let engine = Arc::new(ReconciliationEngine::new(Arc::clone(&store), replica.clone()));
        Ok(Self {
            store,
            replica,
            engine,
        })
    }

    /// In-memory store, for tests and throwaway sessions.
    pub fn in_memory(backend: Option<Arc<dyn RemoteBackend>>, tenant_id: &str) -> Result<Self> {
        Self::with_backend(LocalStore::in_memory()?, backend, tenant_id)
    }

    pub(crate) fn lock_store(&self) -> Result<MutexGuard<'_, LocalStore>> {
        self.store.lock().map_err(|_| CommandError::LockPoisoned)
    }
}
