//! Remote replica access and reconciliation with the local store.

pub mod engine;
pub mod error;
pub mod firestore;
pub mod listener;
pub mod memory;
pub mod merge;
pub mod remote;
pub mod replica;
pub mod session;

pub use engine::{ReconciliationEngine, SharedStore, StatusCallback, SyncStatus};
pub use error::{ErrorClass, RemoteError, SyncError};
pub use firestore::{FirestoreConfig, FirestoreRest};
pub use memory::MemoryRemote;
pub use remote::{ChangeFeed, ChangeKind, DocChange, RemoteBackend, RemoteDocument, Snapshot};
pub use replica::{PushOutcome, ReplicaClient};
pub use session::SyncSession;
