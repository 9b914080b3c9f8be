use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use tally_shared::audit::diff;
use tally_shared::constants::REFERRAL_DISCOUNT;
use tally_shared::{
    status, Client, ClientDraft, ClientPatch, EntityKind, EntitySnapshot, LogEntry, LogKind,
    LogPayload,
};
use tally_store::LocalStore;

use crate::audit;
use crate::commands::{finish, push_record, Mutation, WriteMode};
use crate::error::{CommandError, Result};
use crate::state::AppState;

pub fn list_clients(state: &AppState) -> Result<Vec<Client>> {
    Ok(state.lock_store()?.all::<Client>().to_vec())
}

pub fn get_client(state: &AppState, id: Uuid) -> Result<Client> {
    state
        .lock_store()?
        .get::<Client>(id)
        .cloned()
        .ok_or(CommandError::ClientNotFound(id))
}

pub async fn create_client(state: &AppState, draft: ClientDraft) -> Result<Mutation<Client>> {
    let client = Client::new(draft, status::today());
    let log = {
        let mut store = state.lock_store()?;
        let description = format!("Client \"{}\" created", client.name);
        stage_client(&mut store, &client, LogKind::Create, description, LogPayload::default())?
    };
    publish_new_client(state, client, log).await
}

/// Insert a fully built client and log it with a snapshot. Creation and
/// recovery both go through here.
pub(crate) fn stage_client(
    store: &mut LocalStore,
    client: &Client,
    kind: LogKind,
    description: String,
    mut payload: LogPayload,
) -> Result<LogEntry> {
    store.upsert(client.clone())?;
    payload.snapshot = Some(EntitySnapshot::Client(client.clone()));
    audit::record(store, kind, EntityKind::Client, client.id, description, payload)
}

/// Push a client staged by [`stage_client`].
pub(crate) async fn publish_new_client(state: &AppState, client: Client, log: LogEntry) -> Result<Mutation<Client>> {
    info!(client_id = %client.id, name = %client.name, "Client created");
    let (client, sync) = push_record(state, client, WriteMode::Create).await?;
    Ok(finish(state, client, sync, log).await)
}

pub async fn update_client(state: &AppState, id: Uuid, patch: ClientPatch) -> Result<Mutation<Client>> {
    edit_client(state, id, LogKind::Update, |before| {
        let description = format!("Client \"{}\" updated", before.name);
        (patch, description, None)
    })
    .await
}

/// Hard delete. The log keeps a full snapshot for recovery.
pub async fn delete_client(state: &AppState, id: Uuid) -> Result<Mutation<Client>> {
    let (client, log) = {
        let mut store = state.lock_store()?;
        let client = store
            .remove::<Client>(id)?
            .ok_or(CommandError::ClientNotFound(id))?;
        let payload = LogPayload {
            snapshot: Some(EntitySnapshot::Client(client.clone())),
            ..LogPayload::default()
        };
        let description = format!("Client \"{}\" deleted", client.name);
        let log = audit::record(&mut store, LogKind::Delete, EntityKind::Client, id, description, payload)?;
        (client, log)
    };
    info!(client_id = %id, name = %client.name, "Client deleted");

    let sync = state.replica.push_delete::<Client>(id).await;
    Ok(finish(state, client, sync, log).await)
}

/// Move the due date one period ahead and mark the client paid.
pub async fn renew_client(state: &AppState, id: Uuid) -> Result<Mutation<Client>> {
    edit_client(state, id, LogKind::Renew, |before| {
        let patch = before.renewal_patch();
        let details = json!({
            "previousDueDate": before.due_date,
            "newDueDate": patch.due_date,
        });
        (patch, format!("Client \"{}\" renewed", before.name), Some(details))
    })
    .await
}

/// Mark the client delinquent with interest for `days` late.
pub async fn apply_interest(state: &AppState, id: Uuid, days: u32) -> Result<Mutation<Client>> {
    edit_client(state, id, LogKind::InterestApplied, |before| {
        let patch = before.interest_patch(days);
        let details = json!({
            "days": days,
            "interestAmount": patch.interest_amount,
        });
        let description = format!("Interest applied to \"{}\" for {days} day(s)", before.name);
        (patch, description, Some(details))
    })
    .await
}

/// Credit `referrer_id` with a referral of `referred_id` for this month.
pub async fn register_referral(state: &AppState, referrer_id: Uuid, referred_id: Uuid) -> Result<Mutation<Client>> {
    let referred = get_client(state, referred_id)?;
    let month = status::month_token(status::today());

    edit_client(state, referrer_id, LogKind::ReferralRegistered, |before| {
        let patch = before.referral_patch(&month, REFERRAL_DISCOUNT);
        let details = json!({
            "referredClientId": referred.id,
            "referredClientName": referred.name,
            "month": month,
        });
        let description = format!("\"{}\" referred \"{}\"", before.name, referred.name);
        (patch, description, Some(details))
    })
    .await
}

/// Soft delete: the client stays in the store flagged as cancelled.
pub async fn cancel_client(state: &AppState, id: Uuid) -> Result<Mutation<Client>> {
    edit_client(state, id, LogKind::Cancel, |before| {
        let patch = ClientPatch {
            cancelled: Some(true),
            ..ClientPatch::default()
        };
        (patch, format!("Client \"{}\" cancelled", before.name), None)
    })
    .await
}

/// Undo a cancellation.
pub async fn restore_client(state: &AppState, id: Uuid) -> Result<Mutation<Client>> {
    edit_client(state, id, LogKind::Update, |before| {
        let patch = ClientPatch {
            cancelled: Some(false),
            ..ClientPatch::default()
        };
        (patch, format!("Client \"{}\" reactivated", before.name), None)
    })
    .await
}

/// Periodic status pass over every client: re-derive due status (delinquent
/// clients stay frozen) and drop referral discounts from past months.
/// Local only; returns how many clients changed.
pub fn refresh_statuses(state: &AppState) -> Result<usize> {
    let today = status::today();
    let changed = state
        .lock_store()?
        .update_each::<Client>(|c| c.refresh_status(today))?;
    if changed > 0 {
        info!(changed, "Client statuses refreshed");
    }
    Ok(changed)
}

/// Delete every client, remotely first, then locally. Remote failures are
/// logged and do not stop the local wipe.
pub async fn clear_clients(state: &AppState) -> Result<usize> {
    let ids: Vec<Uuid> = state.lock_store()?.all::<Client>().iter().map(|c| c.id).collect();

    let outcomes =
        futures::future::join_all(ids.iter().map(|id| state.replica.push_delete::<Client>(*id))).await;
    let failed = outcomes.iter().filter(|o| !o.is_synced()).count();
    if failed > 0 && state.replica.is_configured() {
        warn!(failed, total = ids.len(), "Some clients were not deleted remotely");
    }

    state.lock_store()?.replace_all::<Client>(Vec::new())?;
    info!(removed = ids.len(), "All clients cleared");
    Ok(ids.len())
}

/// Apply a patch built from the current client, log the field diff, push.
async fn edit_client(
    state: &AppState,
    id: Uuid,
    kind: LogKind,
    build: impl FnOnce(&Client) -> (ClientPatch, String, Option<Value>),
) -> Result<Mutation<Client>> {
    let today = status::today();
    let (client, log) = {
        let mut store = state.lock_store()?;
        let before = store
            .get::<Client>(id)
            .cloned()
            .ok_or(CommandError::ClientNotFound(id))?;
        let (patch, description, details) = build(&before);

        let mut after = before.clone();
        after.apply_patch(patch, today);
        store.upsert(after.clone())?;

        let payload = LogPayload {
            changes: diff(&before, &after),
            details,
            ..LogPayload::default()
        };
        let log = audit::record(&mut store, kind, EntityKind::Client, id, description, payload)?;
        (after, log)
    };
    info!(client_id = %id, kind = ?kind, "Client updated");

    let (client, sync) = push_record(state, client, WriteMode::Update).await?;
    Ok(finish(state, client, sync, log).await)
}
