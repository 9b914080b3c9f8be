use thiserror::Error;

use tally_store::StoreError;

/// How the engine reacts to a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble. Degrade to offline, retry on the next sync.
    Transient,
    /// Quota exhausted. The breaker stays open for the rest of the session.
    QuotaExhausted,
    Unrecognized,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote quota exceeded")]
    QuotaExceeded,

    #[error("Remote request blocked on the client side")]
    Blocked,

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote deadline exceeded")]
    DeadlineExceeded,

    #[error("Remote replica is not configured")]
    NotConfigured,

    #[error("Remote disabled for this session after quota exhaustion")]
    CircuitOpen,

    #[error("Malformed remote document: {0}")]
    Decode(String),

    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::QuotaExceeded | Self::CircuitOpen => ErrorClass::QuotaExhausted,
            Self::Blocked | Self::Unavailable(_) | Self::DeadlineExceeded | Self::NotConfigured => {
                ErrorClass::Transient
            }
            Self::Decode(_) | Self::Other(_) => ErrorClass::Unrecognized,
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Local store lock poisoned")]
    LockPoisoned,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Remote(e) => e.class(),
            Self::Store(_) | Self::LockPoisoned => ErrorClass::Unrecognized,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
