//! Audit log emitter.
//!
//! A log is appended to the local store in the same critical section as the
//! mutation it describes, then pushed to the remote log collection; a
//! successful push flips its `synced` flag.

use chrono::Utc;
use uuid::Uuid;

use tally_shared::{EntityKind, LogEntry, LogKind, LogPayload};
use tally_store::LocalStore;
use tally_sync::PushOutcome;

use crate::error::Result;
use crate::state::AppState;

/// Append a log for a mutation that was just applied to `store`.
pub(crate) fn record(
    store: &mut LocalStore,
    kind: LogKind,
    entity: EntityKind,
    entity_id: Uuid,
    description: impl Into<String>,
    payload: LogPayload,
) -> Result<LogEntry> {
    let now = Utc::now();
    let entry = LogEntry::new(kind, entity, entity_id, description, payload, now);
    store.append_log(entry.clone(), now)?;
    tracing::debug!(log_id = %entry.id, kind = ?kind, %entity, %entity_id, "Audit log appended");
    Ok(entry)
}

/// Push a new log remotely and mark it synced on success.
pub(crate) async fn push(state: &AppState, entry: &LogEntry) -> PushOutcome {
    let outcome = state.replica.push_new(entry).await;
    mark_synced(state, entry, &outcome);
    outcome
}

/// Push a log whose flags changed locally, merging into the remote copy.
pub(crate) async fn push_flags(state: &AppState, entry: &LogEntry) -> PushOutcome {
    let outcome = state.replica.push(entry).await;
    mark_synced(state, entry, &outcome);
    outcome
}

fn mark_synced(state: &AppState, entry: &LogEntry, outcome: &PushOutcome) {
    if !outcome.is_synced() {
        return;
    }
    let marked = state
        .lock_store()
        .and_then(|mut store| store.mark_log_synced(entry.id).map_err(Into::into));
    if let Err(e) = marked {
        tracing::warn!(log_id = %entry.id, error = %e, "Failed to mark log synced");
    }
}
