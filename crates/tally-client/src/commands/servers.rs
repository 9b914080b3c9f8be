use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tally_shared::audit::diff;
use tally_shared::{
    Client, EntityKind, EntitySnapshot, LogEntry, LogKind, LogPayload, PaymentState, Server,
    ServerDraft, ServerPatch,
};
use tally_store::LocalStore;

use crate::audit;
use crate::commands::{finish, push_record, Mutation, WriteMode};
use crate::error::{CommandError, Result};
use crate::state::AppState;

/// Aggregates over the clients hosted on one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub server: Server,
    pub client_count: usize,
    /// Base cost times the number of clients.
    pub total_cost: f64,
    /// Sum of amounts of clients in the `PAID` state.
    pub amount_received: f64,
    pub total_profit: f64,
}

pub fn list_servers(state: &AppState) -> Result<Vec<Server>> {
    Ok(state.lock_store()?.all::<Server>().to_vec())
}

pub async fn create_server(state: &AppState, draft: ServerDraft) -> Result<Mutation<Server>> {
    let server = Server::new(ServerDraft {
        name: draft.name.trim().to_string(),
        ..draft
    });
    let log = {
        let mut store = state.lock_store()?;
        let description = format!("Server \"{}\" created", server.name);
        stage_server(&mut store, &server, LogKind::Create, description, LogPayload::default())?
    };
    publish_new_server(state, server, log).await
}

/// Insert a fully built server and log it with a snapshot. Names must stay
/// unique because clients reference servers by name.
pub(crate) fn stage_server(
    store: &mut LocalStore,
    server: &Server,
    kind: LogKind,
    description: String,
    mut payload: LogPayload,
) -> Result<LogEntry> {
    ensure_unique_name(store, &server.name, None)?;
    store.upsert(server.clone())?;
    payload.snapshot = Some(EntitySnapshot::Server(server.clone()));
    audit::record(store, kind, EntityKind::Server, server.id, description, payload)
}

pub(crate) async fn publish_new_server(state: &AppState, server: Server, log: LogEntry) -> Result<Mutation<Server>> {
    info!(server_id = %server.id, name = %server.name, "Server created");
    let (server, sync) = push_record(state, server, WriteMode::Create).await?;
    Ok(finish(state, server, sync, log).await)
}

/// Update a server. A rename is carried over to every client that
/// referenced the old name, and those clients are pushed as well.
pub async fn update_server(state: &AppState, id: Uuid, mut patch: ServerPatch) -> Result<Mutation<Server>> {
    patch.name = patch.name.map(|n| n.trim().to_string());

    let (server, renamed, log) = {
        let mut store = state.lock_store()?;
        let before = store
            .get::<Server>(id)
            .cloned()
            .ok_or(CommandError::ServerNotFound(id))?;
        if let Some(name) = &patch.name {
            ensure_unique_name(&store, name, Some(id))?;
        }

        let mut after = before.clone();
        after.apply_patch(patch);
        store.upsert(after.clone())?;

        let mut renamed = Vec::new();
        if after.name != before.name {
            store.update_each::<Client>(|c| {
                if c.server != before.name {
                    return false;
                }
                c.server = after.name.clone();
                renamed.push(c.clone());
                true
            })?;
        }

        let payload = LogPayload {
            changes: diff(&before, &after),
            details: (!renamed.is_empty()).then(|| json!({ "renamedClients": renamed.len() })),
            ..LogPayload::default()
        };
        let description = format!("Server \"{}\" updated", before.name);
        let log = audit::record(&mut store, LogKind::Update, EntityKind::Server, id, description, payload)?;
        (after, renamed, log)
    };
    info!(server_id = %id, renamed_clients = renamed.len(), "Server updated");

    let mut related = Vec::with_capacity(renamed.len());
    for client in renamed {
        let id = client.id;
        let (_, outcome) = push_record(state, client, WriteMode::Update).await?;
        related.push((id, outcome));
    }
    let (server, sync) = push_record(state, server, WriteMode::Update).await?;
    let mut mutation = finish(state, server, sync, log).await;
    mutation.related = related;
    Ok(mutation)
}

/// Delete a server. Rejected while any client still references it by name.
pub async fn delete_server(state: &AppState, id: Uuid) -> Result<Mutation<Server>> {
    let (server, log) = {
        let mut store = state.lock_store()?;
        let name = store
            .get::<Server>(id)
            .map(|s| s.name.clone())
            .ok_or(CommandError::ServerNotFound(id))?;
        let clients = store.all::<Client>().iter().filter(|c| c.server == name).count();
        if clients > 0 {
            return Err(CommandError::ServerInUse { name, clients });
        }

        let server = store
            .remove::<Server>(id)?
            .ok_or(CommandError::ServerNotFound(id))?;
        let payload = LogPayload {
            snapshot: Some(EntitySnapshot::Server(server.clone())),
            ..LogPayload::default()
        };
        let description = format!("Server \"{}\" deleted", server.name);
        let log = audit::record(&mut store, LogKind::Delete, EntityKind::Server, id, description, payload)?;
        (server, log)
    };
    info!(server_id = %id, name = %server.name, "Server deleted");

    let sync = state.replica.push_delete::<Server>(id).await;
    Ok(finish(state, server, sync, log).await)
}

pub fn server_stats(state: &AppState, id: Uuid) -> Result<ServerStats> {
    let store = state.lock_store()?;
    let server = store
        .get::<Server>(id)
        .ok_or(CommandError::ServerNotFound(id))?;
    Ok(stats_for(server, store.all::<Client>()))
}

pub fn all_server_stats(state: &AppState) -> Result<Vec<ServerStats>> {
    let store = state.lock_store()?;
    let clients = store.all::<Client>();
    Ok(store
        .all::<Server>()
        .iter()
        .map(|s| stats_for(s, clients))
        .collect())
}

pub(crate) fn stats_for(server: &Server, clients: &[Client]) -> ServerStats {
    let hosted: Vec<&Client> = clients.iter().filter(|c| c.server == server.name).collect();
    ServerStats {
        server: server.clone(),
        client_count: hosted.len(),
        total_cost: server.base_cost * hosted.len() as f64,
        amount_received: hosted
            .iter()
            .filter(|c| c.payment_state == PaymentState::Paid)
            .map(|c| c.amount)
            .sum(),
        total_profit: hosted.iter().map(|c| c.client_profit).sum(),
    }
}

fn ensure_unique_name(store: &LocalStore, name: &str, except: Option<Uuid>) -> Result<()> {
    let taken = store
        .all::<Server>()
        .iter()
        .any(|s| s.name == name && Some(s.id) != except);
    if taken {
        return Err(CommandError::DuplicateServerName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tally_shared::{status, ClientDraft};
    use tally_sync::{MemoryRemote, RemoteBackend};

    use super::*;
    use crate::commands::clients;

    fn draft(name: &str, base_cost: f64) -> ServerDraft {
        ServerDraft {
            name: name.into(),
            base_cost,
        }
    }

    async fn add_client(state: &AppState, name: &str, server: &str, amount: f64, paid: bool) -> Client {
        let today = status::today();
        let draft = ClientDraft {
            name: name.into(),
            server: server.into(),
            entry_date: today,
            due_date: today + Duration::days(15),
            amount,
            payment_state: if paid { PaymentState::Paid } else { PaymentState::Pending },
            screens: 1,
            server_unit_cost: 5.0,
        };
        clients::create_client(state, draft).await.unwrap().value
    }

    #[tokio::test]
    async fn names_are_trimmed_and_unique() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let s = create_server(&state, draft("  alpha ", 10.0)).await.unwrap().value;
        assert_eq!(s.name, "alpha");

        assert!(matches!(
            create_server(&state, draft("alpha", 3.0)).await,
            Err(CommandError::DuplicateServerName(name)) if name == "alpha"
        ));
        assert_eq!(list_servers(&state).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_rejected_while_referenced() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let s = create_server(&state, draft("alpha", 10.0)).await.unwrap().value;
        let c = add_client(&state, "ana", "alpha", 30.0, true).await;

        assert!(matches!(
            delete_server(&state, s.id).await,
            Err(CommandError::ServerInUse { clients: 1, .. })
        ));

        clients::delete_client(&state, c.id).await.unwrap();
        delete_server(&state, s.id).await.unwrap();
        assert!(list_servers(&state).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_cascades_to_clients() {
        let remote = MemoryRemote::new();
        let backend: Arc<dyn RemoteBackend> = Arc::new(remote.clone());
        let state = AppState::in_memory(Some(backend), "tenant").unwrap();

        let s = create_server(&state, draft("alpha", 10.0)).await.unwrap().value;
        let hosted = add_client(&state, "ana", "alpha", 30.0, true).await;
        let other = add_client(&state, "bia", "beta", 30.0, true).await;

        let patch = ServerPatch {
            name: Some("gamma".into()),
            ..ServerPatch::default()
        };
        let m = update_server(&state, s.id, patch).await.unwrap();
        assert_eq!(m.value.name, "gamma");
        assert!(m.sync.is_synced());

        assert_eq!(m.related.len(), 1);
        assert_eq!(m.related[0].0, hosted.id);
        assert!(m.related[0].1.is_synced());
        assert!(m.log_sync.is_synced());

        assert_eq!(clients::get_client(&state, hosted.id).unwrap().server, "gamma");
        assert_eq!(clients::get_client(&state, other.id).unwrap().server, "beta");

        let remote_servers: Vec<String> = remote
            .documents(tally_shared::Collection::Clients)
            .iter()
            .filter_map(|d| d.data["server"].as_str().map(str::to_string))
            .collect();
        assert!(remote_servers.contains(&"gamma".to_string()));
        assert!(!remote_servers.contains(&"alpha".to_string()));
    }

    #[tokio::test]
    async fn stats_aggregate_hosted_clients() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let s = create_server(&state, draft("alpha", 10.0)).await.unwrap().value;
        add_client(&state, "ana", "alpha", 30.0, true).await;
        add_client(&state, "bia", "alpha", 20.0, false).await;
        add_client(&state, "caio", "beta", 50.0, true).await;

        let stats = server_stats(&state, s.id).unwrap();
        assert_eq!(stats.client_count, 2);
        assert_eq!(stats.total_cost, 20.0);
        assert_eq!(stats.amount_received, 30.0);
        assert_eq!(stats.total_profit, 25.0 + 15.0);
        assert_eq!(all_server_stats(&state).unwrap(), vec![stats]);
    }
}
