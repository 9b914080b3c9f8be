//! In-memory tables backed by the persisted collection blobs.

use uuid::Uuid;

use tally_shared::constants::MAX_LOG_ENTRIES;
use tally_shared::{Client, LogEntry, Record, Server};

use crate::database::Database;
use crate::error::Result;

/// Authoritative local copy of all entities on this device.
///
/// Every mutating call rewrites the affected collection blob before
/// returning. There is no incremental persistence: collections are small.
pub struct LocalStore {
    db: Database,
    clients: Vec<Client>,
    servers: Vec<Server>,
    logs: Vec<LogEntry>,
}

/// Records that have a table inside [`LocalStore`].
pub trait Stored: Record {
    fn table(store: &LocalStore) -> &Vec<Self>;
    fn table_mut(store: &mut LocalStore) -> &mut Vec<Self>;

    /// Restore the table's ordering/size rules after a bulk replacement.
    fn normalize(_records: &mut Vec<Self>) {}
}

impl Stored for Client {
    fn table(store: &LocalStore) -> &Vec<Self> {
        &store.clients
    }

    fn table_mut(store: &mut LocalStore) -> &mut Vec<Self> {
        &mut store.clients
    }
}

impl Stored for Server {
    fn table(store: &LocalStore) -> &Vec<Self> {
        &store.servers
    }

    fn table_mut(store: &mut LocalStore) -> &mut Vec<Self> {
        &mut store.servers
    }
}

impl Stored for LogEntry {
    fn table(store: &LocalStore) -> &Vec<Self> {
        &store.logs
    }

    fn table_mut(store: &mut LocalStore) -> &mut Vec<Self> {
        &mut store.logs
    }

    // Newest first, capped.
    fn normalize(records: &mut Vec<Self>) {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(MAX_LOG_ENTRIES);
    }
}

impl LocalStore {
    /// Load every collection from `db`.
    pub fn open(db: Database) -> Result<Self> {
        let clients = db.load_collection::<Client>()?;
        let servers = db.load_collection::<Server>()?;
        let logs = db.load_collection::<LogEntry>()?;

        tracing::info!(
            clients = clients.len(),
            servers = servers.len(),
            logs = logs.len(),
            "local store loaded"
        );

        Ok(Self {
            db,
            clients,
            servers,
            logs,
        })
    }

    /// Convenience constructor backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(Database::open_in_memory()?)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn all<T: Stored>(&self) -> &[T] {
        T::table(self)
    }

    pub fn get<T: Stored>(&self, id: Uuid) -> Option<&T> {
        T::table(self).iter().find(|r| r.id() == id)
    }

    /// Replace the record with the same id, or append it.
    pub fn upsert<T: Stored>(&mut self, record: T) -> Result<()> {
        let table = T::table_mut(self);
        match table.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => table.push(record),
        }
        self.persist::<T>()
    }

    /// Remove a record by id, returning it if it existed.
    pub fn remove<T: Stored>(&mut self, id: Uuid) -> Result<Option<T>> {
        let table = T::table_mut(self);
        let Some(pos) = table.iter().position(|r| r.id() == id) else {
            return Ok(None);
        };
        let removed = table.remove(pos);
        self.persist::<T>()?;
        Ok(Some(removed))
    }

    /// Swap the whole collection. Used after a merge.
    pub fn replace_all<T: Stored>(&mut self, mut records: Vec<T>) -> Result<()> {
        T::normalize(&mut records);
        *T::table_mut(self) = records;
        self.persist::<T>()
    }

    /// Apply `f` to every record, persisting once if any call returned `true`.
    pub fn update_each<T: Stored>(&mut self, mut f: impl FnMut(&mut T) -> bool) -> Result<usize> {
        let changed = T::table_mut(self)
            .iter_mut()
            .fold(0, |n, record| if f(record) { n + 1 } else { n });
        if changed > 0 {
            self.persist::<T>()?;
        }
        Ok(changed)
    }

    /// Rewrite the persisted blob of `T` from memory.
    pub fn persist<T: Stored>(&self) -> Result<()> {
        self.db.save_collection(T::table(self))
    }

    pub fn auth_flag(&self) -> Result<bool> {
        self.db.auth_flag()
    }

    pub fn set_auth_flag(&self, is_authenticated: bool) -> Result<()> {
        self.db.set_auth_flag(is_authenticated)
    }

    /// Reload every table from the database, discarding in-memory state.
    pub fn reload(&mut self) -> Result<()> {
        self.clients = self.db.load_collection()?;
        self.servers = self.db.load_collection()?;
        self.logs = self.db.load_collection()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_shared::ServerDraft;

    fn server(name: &str) -> Server {
        Server::new(ServerDraft {
            name: name.into(),
            base_cost: 10.0,
        })
    }

    #[test]
    fn upsert_inserts_then_replaces() {
        let mut store = LocalStore::in_memory().unwrap();
        let mut s = server("alpha");
        store.upsert(s.clone()).unwrap();

        s.base_cost = 11.0;
        store.upsert(s.clone()).unwrap();

        assert_eq!(store.all::<Server>(), &[s]);
    }

    #[test]
    fn remove_returns_record() {
        let mut store = LocalStore::in_memory().unwrap();
        let s = server("alpha");
        store.upsert(s.clone()).unwrap();

        assert_eq!(store.remove::<Server>(s.id).unwrap(), Some(s.clone()));
        assert_eq!(store.remove::<Server>(s.id).unwrap(), None);
        assert!(store.all::<Server>().is_empty());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");

        let a = server("alpha");
        let b = server("beta");
        {
            let mut store = LocalStore::open(Database::open_at(&path).unwrap()).unwrap();
            store.upsert(a.clone()).unwrap();
            store.upsert(b.clone()).unwrap();
            store.remove::<Server>(a.id).unwrap();
        }

        let store = LocalStore::open(Database::open_at(&path).unwrap()).unwrap();
        assert_eq!(store.all::<Server>(), &[b]);
    }

    #[test]
    fn replace_all_overwrites_collection() {
        let mut store = LocalStore::in_memory().unwrap();
        store.upsert(server("old")).unwrap();

        let fresh = vec![server("x"), server("y")];
        store.replace_all(fresh.clone()).unwrap();
        assert_eq!(store.all::<Server>(), fresh.as_slice());

        store.reload().unwrap();
        assert_eq!(store.all::<Server>(), fresh.as_slice());
    }

    #[test]
    fn auth_flag_persists_beside_collections() {
        let mut store = LocalStore::in_memory().unwrap();
        store.set_auth_flag(true).unwrap();
        store.reload().unwrap();
        assert!(store.auth_flag().unwrap());
        assert!(store.all::<Server>().is_empty());
    }

    #[test]
    fn update_each_counts_changes() {
        let mut store = LocalStore::in_memory().unwrap();
        store.upsert(server("a")).unwrap();
        store.upsert(server("b")).unwrap();

        let changed = store
            .update_each::<Server>(|s| {
                if s.name == "a" {
                    s.base_cost = 1.0;
                    true
                } else {
                    false
                }
            })
            .unwrap();
        assert_eq!(changed, 1);
    }
}
