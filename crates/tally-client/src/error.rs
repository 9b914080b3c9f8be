use thiserror::Error;
use uuid::Uuid;

use tally_store::StoreError;

/// Errors surfaced to the caller of a command.
///
/// Remote failures never appear here: they are reported through
/// [`tally_sync::PushOutcome`] on the returned mutation.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Server not found: {0}")]
    ServerNotFound(Uuid),

    #[error("Log not found: {0}")]
    LogNotFound(Uuid),

    #[error("Server `{name}` is still used by {clients} client(s)")]
    ServerInUse { name: String, clients: usize },

    #[error("A server named `{0}` already exists")]
    DuplicateServerName(String),

    #[error("Log {0} was already used to recover its entity")]
    AlreadyRecovered(Uuid),

    #[error("Log {0} holds no deleted entity to recover")]
    NotRecoverable(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CommandError>;
