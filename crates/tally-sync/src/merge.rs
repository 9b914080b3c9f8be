//! Id-keyed merge of local and remote collections.

use std::collections::HashSet;

use uuid::Uuid;

use tally_shared::Record;

/// A decoded change from a live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange<T> {
    Upsert(T),
    Remove(Uuid),
}

/// Merge a freshly pulled remote collection into the local one.
///
/// An empty local side adopts the remote set as is. Otherwise the side
/// with priority is taken whole and records only present on the other
/// side are appended:
///
/// - push succeeded: remote already holds this device's edits, so it wins;
///   local-only records (failed individual pushes) are kept.
/// - push failed: local wins so offline edits survive; remote-only records
///   are added.
pub fn merge_by_id<T: Record>(local: Vec<T>, remote: Vec<T>, push_succeeded: bool) -> Vec<T> {
    if local.is_empty() {
        return remote;
    }

    let (mut merged, secondary) = if push_succeeded {
        (remote, local)
    } else {
        (local, remote)
    };

    let present: HashSet<Uuid> = merged.iter().map(Record::id).collect();
    merged.extend(secondary.into_iter().filter(|r| !present.contains(&r.id())));
    merged
}

/// Apply live changes by id. Upserts replace in place or append, removals
/// drop the record. Order of untouched records is preserved.
pub fn apply_changes<T: Record>(mut current: Vec<T>, changes: Vec<RecordChange<T>>) -> Vec<T> {
    for change in changes {
        match change {
            RecordChange::Upsert(record) => {
                match current.iter_mut().find(|r| r.id() == record.id()) {
                    Some(existing) => *existing = record,
                    None => current.push(record),
                }
            }
            RecordChange::Remove(id) => current.retain(|r| r.id() != id),
        }
    }
    current
}
