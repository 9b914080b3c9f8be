//! Per-process sync flags: the quota breaker and the re-entrancy latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared by every remote call of one session.
///
/// The quota breaker never closes again once tripped; a new session
/// (process restart) is the only reset.
#[derive(Debug, Default)]
pub struct SyncSession {
    quota_exceeded: AtomicBool,
    syncing: AtomicBool,
}

impl SyncSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.quota_exceeded.load(Ordering::Acquire)
    }

    /// Open the breaker. Returns `true` only for the call that tripped it.
    pub fn trip_quota(&self, operation: &str) -> bool {
        let tripped = !self.quota_exceeded.swap(true, Ordering::AcqRel);
        if tripped {
            tracing::warn!(operation, "Remote quota exceeded, remote sync disabled for this session");
        }
        tripped
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Claim the sync latch. `None` if another sync is running.
    pub fn try_begin_sync(self: &Arc<Self>) -> Option<SyncGuard> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard {
                session: Arc::clone(self),
            })
    }
}

/// Releases the sync latch on drop.
#[derive(Debug)]
pub struct SyncGuard {
    session: Arc<SyncSession>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.session.syncing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_once() {
        let session = SyncSession::new();
        assert!(!session.is_quota_exceeded());
        assert!(session.trip_quota("create"));
        assert!(!session.trip_quota("update"));
        assert!(session.is_quota_exceeded());
    }

    #[test]
    fn sync_latch_is_exclusive_and_released() {
        let session = SyncSession::new();
        let guard = session.try_begin_sync();
        assert!(guard.is_some());
        assert!(session.try_begin_sync().is_none());
        assert!(session.is_syncing());

        drop(guard);
        assert!(!session.is_syncing());
        assert!(session.try_begin_sync().is_some());
    }

    #[test]
    fn sessions_are_independent() {
        let a = SyncSession::new();
        let b = SyncSession::new();
        a.trip_quota("query");
        assert!(!b.is_quota_exceeded());
    }
}
