//! Audit log table rules: retention window, size cap, sync/recovery flags.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tally_shared::constants::{LOG_RETENTION_DAYS, MAX_LOG_ENTRIES};
use tally_shared::LogEntry;

use crate::error::Result;
use crate::store::LocalStore;

impl LocalStore {
    /// Prepend `entry`, dropping logs outside the retention window and
    /// evicting the oldest beyond the cap.
    pub fn append_log(&mut self, entry: LogEntry, now: DateTime<Utc>) -> Result<()> {
        let cutoff = now - Duration::days(LOG_RETENTION_DAYS);
        let logs = self.logs_mut();
        logs.retain(|l| l.timestamp > cutoff);
        logs.insert(0, entry);
        logs.truncate(MAX_LOG_ENTRIES);
        self.persist::<LogEntry>()
    }

    /// Set the `synced` flag. Returns `false` if the log no longer exists.
    pub fn mark_log_synced(&mut self, log_id: Uuid) -> Result<bool> {
        self.set_log_flag(log_id, |l| l.synced = true)
    }

    /// Set the `recovered` flag and clear `synced`, since the replica copy
    /// is now stale. Returns `false` if the log no longer exists.
    pub fn mark_log_recovered(&mut self, log_id: Uuid) -> Result<bool> {
        self.set_log_flag(log_id, |l| {
            l.recovered = true;
            l.synced = false;
        })
    }

    /// Drop logs older than `days`. Returns how many were removed.
    pub fn prune_logs(&mut self, now: DateTime<Utc>, days: i64) -> Result<usize> {
        let cutoff = now - Duration::days(days);
        let logs = self.logs_mut();
        let before = logs.len();
        logs.retain(|l| l.timestamp > cutoff);
        let removed = before - logs.len();
        if removed > 0 {
            self.persist::<LogEntry>()?;
        }
        Ok(removed)
    }

    pub fn clear_logs(&mut self) -> Result<()> {
        self.replace_all::<LogEntry>(Vec::new())
    }

    fn set_log_flag(&mut self, log_id: Uuid, f: impl FnOnce(&mut LogEntry)) -> Result<bool> {
        let Some(log) = self.logs_mut().iter_mut().find(|l| l.id == log_id) else {
            return Ok(false);
        };
        f(log);
        self.persist::<LogEntry>()?;
        Ok(true)
    }

    fn logs_mut(&mut self) -> &mut Vec<LogEntry> {
        <LogEntry as crate::store::Stored>::table_mut(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_shared::{EntityKind, LogKind, LogPayload};

    fn log_at(at: DateTime<Utc>) -> LogEntry {
        LogEntry::new(
            LogKind::Update,
            EntityKind::Client,
            Uuid::new_v4(),
            "updated",
            LogPayload::default(),
            at,
        )
    }

    #[test]
    fn append_prepends_newest() {
        let mut store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        let first = log_at(now - Duration::minutes(5));
        let second = log_at(now);

        store.append_log(first.clone(), now).unwrap();
        store.append_log(second.clone(), now).unwrap();

        let logs = store.all::<LogEntry>();
        assert_eq!(logs[0].id, second.id);
        assert_eq!(logs[1].id, first.id);
    }

    #[test]
    fn append_prunes_expired_logs() {
        let mut store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        let old = log_at(now - Duration::days(16));
        let recent = log_at(now - Duration::days(14));
        store.replace_all(vec![old.clone(), recent.clone()]).unwrap();

        store.append_log(log_at(now), now).unwrap();

        let logs = store.all::<LogEntry>();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.id != old.id));
    }

    #[test]
    fn append_caps_log_count() {
        let mut store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        let existing: Vec<LogEntry> = (0..MAX_LOG_ENTRIES as i64)
            .map(|i| log_at(now - Duration::seconds(i + 1)))
            .collect();
        let oldest = existing[MAX_LOG_ENTRIES - 1].id;
        store.replace_all(existing).unwrap();

        let newest = log_at(now);
        store.append_log(newest.clone(), now).unwrap();

        let logs = store.all::<LogEntry>();
        assert_eq!(logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(logs[0].id, newest.id);
        assert!(logs.iter().all(|l| l.id != oldest));
    }

    #[test]
    fn flags_are_persisted() {
        let mut store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        let log = log_at(now);
        store.append_log(log.clone(), now).unwrap();

        assert!(store.mark_log_synced(log.id).unwrap());
        assert!(store.mark_log_recovered(log.id).unwrap());
        assert!(!store.mark_log_synced(Uuid::new_v4()).unwrap());

        store.reload().unwrap();
        let stored = store.get::<LogEntry>(log.id).unwrap();
        assert!(stored.recovered);
        assert!(!stored.synced);
    }

    #[test]
    fn prune_with_custom_window() {
        let mut store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .replace_all(vec![log_at(now - Duration::days(3)), log_at(now)])
            .unwrap();

        assert_eq!(store.prune_logs(now, 2).unwrap(), 1);
        assert_eq!(store.all::<LogEntry>().len(), 1);
    }
}
