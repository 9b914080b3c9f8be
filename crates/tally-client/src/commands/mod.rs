//! Domain commands.
//!
//! Each command applies its change to the local store first, appends the
//! audit log in the same critical section, and only then talks to the
//! remote replica. Local state is final before the first await; the
//! returned [`Mutation`] reports what happened remotely.

pub mod backup;
pub mod clients;
pub mod dashboard;
pub mod logs;
pub mod servers;
pub mod sync;

use uuid::Uuid;

use tally_shared::LogEntry;
use tally_store::Stored;
use tally_sync::PushOutcome;

use crate::audit;
use crate::error::Result;
use crate::state::AppState;

/// Result of a mutating command.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    /// The entity as stored locally after the command.
    pub value: T,
    /// Remote outcome for the entity write.
    pub sync: PushOutcome,
    /// Audit log recorded for the command.
    pub log_id: Uuid,
    /// Remote outcome for the audit log write.
    pub log_sync: PushOutcome,
    /// Other records the command wrote, with their remote outcomes: clients
    /// renamed along with their server, the log a recovery consumed.
    pub related: Vec<(Uuid, PushOutcome)>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteMode {
    Create,
    Update,
}

/// Push `record` and stamp the server time onto the stored copy.
pub(crate) async fn push_record<T: Stored>(state: &AppState, mut record: T, mode: WriteMode) -> Result<(T, PushOutcome)> {
    let outcome = match mode {
        WriteMode::Create => state.replica.push_new(&record).await,
        WriteMode::Update => state.replica.push(&record).await,
    };

    if let PushOutcome::Synced {
        updated_at: Some(at),
    } = outcome
    {
        record.set_updated_at(at);
        let mut store = state.lock_store()?;
        // The record may have changed or gone while the push was in flight.
        let stamped = store.get::<T>(record.id()).cloned().map(|mut current| {
            current.set_updated_at(at);
            current
        });
        if let Some(current) = stamped {
            store.upsert(current)?;
        }
    }

    Ok((record, outcome))
}

/// Push the command's log and assemble the result.
pub(crate) async fn finish<T>(state: &AppState, value: T, sync: PushOutcome, log: LogEntry) -> Mutation<T> {
    let log_sync = audit::push(state, &log).await;
    Mutation {
        value,
        sync,
        log_id: log.id,
        log_sync,
        related: Vec::new(),
    }
}
