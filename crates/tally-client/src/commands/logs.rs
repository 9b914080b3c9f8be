use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tally_shared::{status, Client, EntitySnapshot, LogEntry, LogKind, LogPayload, Server};

use crate::audit;
use crate::commands::clients::{publish_new_client, stage_client};
use crate::commands::servers::{publish_new_server, stage_server};
use crate::commands::Mutation;
use crate::error::{CommandError, Result};
use crate::state::AppState;

/// Entity brought back by [`recover`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recovered {
    Client(Mutation<Client>),
    Server(Mutation<Server>),
}

impl Recovered {
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Client(m) => m.value.id,
            Self::Server(m) => m.value.id,
        }
    }

    pub fn log_id(&self) -> Uuid {
        match self {
            Self::Client(m) => m.log_id,
            Self::Server(m) => m.log_id,
        }
    }
}

/// Every retained log, newest first.
pub fn list_logs(state: &AppState) -> Result<Vec<LogEntry>> {
    Ok(state.lock_store()?.all::<LogEntry>().to_vec())
}

/// Logs that have not reached the remote log collection yet.
pub fn unsynced_logs(state: &AppState) -> Result<Vec<LogEntry>> {
    Ok(state
        .lock_store()?
        .all::<LogEntry>()
        .iter()
        .filter(|l| !l.synced)
        .cloned()
        .collect())
}

/// Re-create the entity captured by a DELETE log.
///
/// The entity comes back under a new id through the regular creation path,
/// a RESTORE log pointing at `log_id` is appended, and the DELETE log is
/// flagged so it cannot be used twice. All of that happens under one store
/// lock; only the remote pushes run afterwards.
pub async fn recover(state: &AppState, log_id: Uuid) -> Result<Recovered> {
    let (staged, flagged) = {
        let mut store = state.lock_store()?;
        let log = store
            .get::<LogEntry>(log_id)
            .ok_or(CommandError::LogNotFound(log_id))?;
        if log.recovered {
            return Err(CommandError::AlreadyRecovered(log_id));
        }
        if !log.is_recoverable() {
            return Err(CommandError::NotRecoverable(log_id));
        }
        let snapshot = log
            .payload
            .snapshot
            .clone()
            .ok_or(CommandError::NotRecoverable(log_id))?;

        let payload = LogPayload {
            recovered_from: Some(log_id),
            details: Some(json!({ "originalId": snapshot.id() })),
            ..LogPayload::default()
        };
        let staged = match snapshot {
            EntitySnapshot::Client(original) => {
                let client = original.recreate(status::today());
                let description = format!("Client \"{}\" restored from log", client.name);
                let log = stage_client(&mut store, &client, LogKind::Restore, description, payload)?;
                Staged::Client(client, log)
            }
            EntitySnapshot::Server(original) => {
                let server = original.recreate();
                let description = format!("Server \"{}\" restored from log", server.name);
                let log = stage_server(&mut store, &server, LogKind::Restore, description, payload)?;
                Staged::Server(server, log)
            }
        };
        store.mark_log_recovered(log_id)?;
        let flagged = store
            .get::<LogEntry>(log_id)
            .cloned()
            .ok_or(CommandError::LogNotFound(log_id))?;
        (staged, flagged)
    };
    info!(%log_id, "Entity recovered from delete log");

    // Other devices must see the flag before they can restore the same entity.
    let flag_sync = audit::push_flags(state, &flagged).await;
    let related = vec![(log_id, flag_sync)];

    match staged {
        Staged::Client(client, log) => {
            let mut mutation = publish_new_client(state, client, log).await?;
            mutation.related = related;
            Ok(Recovered::Client(mutation))
        }
        Staged::Server(server, log) => {
            let mut mutation = publish_new_server(state, server, log).await?;
            mutation.related = related;
            Ok(Recovered::Server(mutation))
        }
    }
}

enum Staged {
    Client(Client, LogEntry),
    Server(Server, LogEntry),
}

/// Drop logs older than `days` days. Returns how many were removed.
pub fn prune_logs(state: &AppState, days: i64) -> Result<usize> {
    let removed = state.lock_store()?.prune_logs(Utc::now(), days)?;
    info!(removed, days, "Logs pruned");
    Ok(removed)
}

/// Drop every local log. Remote copies are left alone.
pub fn clear_logs(state: &AppState) -> Result<()> {
    state.lock_store()?.clear_logs()?;
    info!("Logs cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tally_shared::{ClientDraft, Collection, PaymentState, ServerDraft};
    use tally_sync::{MemoryRemote, RemoteBackend, SyncStatus};

    use super::*;
    use crate::commands::{clients, servers};

    fn draft(name: &str) -> ClientDraft {
        let today = status::today();
        ClientDraft {
            name: name.into(),
            server: "alpha".into(),
            entry_date: today,
            due_date: today + Duration::days(3),
            amount: 35.0,
            payment_state: PaymentState::Pending,
            screens: 2,
            server_unit_cost: 6.5,
        }
    }

    fn connected(remote: &MemoryRemote) -> AppState {
        let backend: Arc<dyn RemoteBackend> = Arc::new(remote.clone());
        AppState::in_memory(Some(backend), "tenant").unwrap()
    }

    fn remote_log(remote: &MemoryRemote, log_id: Uuid) -> serde_json::Value {
        let doc_id = format!("tenant_{log_id}");
        remote
            .documents(Collection::Logs)
            .into_iter()
            .find(|d| d.id == doc_id)
            .map(|d| d.data)
            .unwrap()
    }

    fn delete_log(state: &AppState, entity_id: Uuid) -> LogEntry {
        list_logs(state)
            .unwrap()
            .into_iter()
            .find(|l| l.kind == LogKind::Delete && l.entity_id == entity_id)
            .unwrap()
    }

    #[tokio::test]
    async fn recovered_client_matches_deleted_one_except_id() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let original = clients::create_client(&state, draft("ana")).await.unwrap().value;
        clients::delete_client(&state, original.id).await.unwrap();
        let log = delete_log(&state, original.id);

        let Recovered::Client(restored) = recover(&state, log.id).await.unwrap() else {
            panic!("expected a client");
        };
        let restored = restored.value;

        assert_ne!(restored.id, original.id);
        assert_eq!(
            restored,
            Client {
                id: restored.id,
                updated_at: restored.updated_at,
                ..original
            }
        );
        assert_eq!(clients::list_clients(&state).unwrap(), vec![restored]);
    }

    #[tokio::test]
    async fn recover_marks_log_and_rejects_second_attempt() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let client = clients::create_client(&state, draft("ana")).await.unwrap().value;
        clients::delete_client(&state, client.id).await.unwrap();
        let log = delete_log(&state, client.id);

        let recovered = recover(&state, log.id).await.unwrap();

        let logs = list_logs(&state).unwrap();
        assert!(logs.iter().find(|l| l.id == log.id).unwrap().recovered);
        let restore = logs.iter().find(|l| l.id == recovered.log_id()).unwrap();
        assert_eq!(restore.kind, LogKind::Restore);
        assert_eq!(restore.entity_id, recovered.entity_id());
        assert_eq!(restore.payload.recovered_from, Some(log.id));

        assert!(matches!(
            recover(&state, log.id).await,
            Err(CommandError::AlreadyRecovered(id)) if id == log.id
        ));
        assert_eq!(clients::list_clients(&state).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_delete_logs_are_recoverable() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let created = clients::create_client(&state, draft("ana")).await.unwrap();

        assert!(matches!(
            recover(&state, created.log_id).await,
            Err(CommandError::NotRecoverable(_))
        ));
        assert!(matches!(
            recover(&state, Uuid::new_v4()).await,
            Err(CommandError::LogNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleted_server_comes_back_under_new_id() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let server = servers::create_server(
            &state,
            ServerDraft {
                name: "alpha".into(),
                base_cost: 12.0,
            },
        )
        .await
        .unwrap()
        .value;
        servers::delete_server(&state, server.id).await.unwrap();
        let log = delete_log(&state, server.id);

        let Recovered::Server(restored) = recover(&state, log.id).await.unwrap() else {
            panic!("expected a server");
        };
        assert_ne!(restored.value.id, server.id);
        assert_eq!(restored.value.name, "alpha");
        assert_eq!(restored.value.base_cost, 12.0);
    }

    #[tokio::test]
    async fn recovery_is_pushed_as_a_new_document() {
        let remote = MemoryRemote::new();
        let state = connected(&remote);

        let client = clients::create_client(&state, draft("ana")).await.unwrap().value;
        clients::delete_client(&state, client.id).await.unwrap();
        let log = delete_log(&state, client.id);
        let recovered = recover(&state, log.id).await.unwrap();

        let Recovered::Client(m) = &recovered else {
            panic!("expected a client");
        };
        assert!(m.sync.is_synced());
        let ids: Vec<String> = remote
            .documents(Collection::Clients)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![format!("tenant_{}", m.value.id)]);
    }

    #[tokio::test]
    async fn recovered_flag_reaches_other_devices() {
        let remote = MemoryRemote::new();
        let first = connected(&remote);
        let second = connected(&remote.peer());

        let client = clients::create_client(&first, draft("ana")).await.unwrap().value;
        clients::delete_client(&first, client.id).await.unwrap();
        let log = delete_log(&first, client.id);
        assert_eq!(second.engine.initialize().await, SyncStatus::Synced);
        assert!(!delete_log(&second, client.id).recovered);

        let Recovered::Client(m) = recover(&first, log.id).await.unwrap() else {
            panic!("expected a client");
        };
        assert_eq!(m.related.len(), 1);
        assert_eq!(m.related[0].0, log.id);
        assert!(m.related[0].1.is_synced());
        assert!(delete_log(&first, client.id).synced);
        assert_eq!(remote_log(&remote, log.id)["recovered"], json!(true));

        // A full run on the other device must neither revert the flag nor
        // allow a second restore.
        assert_eq!(second.engine.reconnect().await, SyncStatus::Synced);
        assert_eq!(remote_log(&remote, log.id)["recovered"], json!(true));
        assert!(delete_log(&second, client.id).recovered);
        assert!(matches!(
            recover(&second, log.id).await,
            Err(CommandError::AlreadyRecovered(id)) if id == log.id
        ));
        assert_eq!(remote.documents(Collection::Clients).len(), 1);
    }

    #[tokio::test]
    async fn prune_and_clear() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        clients::create_client(&state, draft("ana")).await.unwrap();
        clients::create_client(&state, draft("bia")).await.unwrap();

        assert_eq!(prune_logs(&state, 1).unwrap(), 0);
        assert_eq!(list_logs(&state).unwrap().len(), 2);
        assert_eq!(unsynced_logs(&state).unwrap().len(), 2);

        clear_logs(&state).unwrap();
        assert!(list_logs(&state).unwrap().is_empty());
    }
}
