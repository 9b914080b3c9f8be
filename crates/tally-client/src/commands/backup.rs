use std::path::Path;

use tracing::info;

use tally_store::{BackupBundle, ImportStats, StoreError};

use crate::error::Result;
use crate::state::AppState;

/// Current clients and servers as a pretty-printed backup document.
pub fn export_backup(state: &AppState) -> Result<String> {
    let bundle = state.lock_store()?.export_bundle();
    Ok(bundle.to_json_pretty()?)
}

pub async fn save_backup_to_file(state: &AppState, path: &Path) -> Result<()> {
    let json = export_backup(state)?;
    tokio::fs::write(path, json)
        .await
        .map_err(StoreError::from)?;
    info!(path = %path.display(), "Backup written");
    Ok(())
}

/// Replace local clients and servers with the content of a backup document.
///
/// Nothing is pushed: the next sync run merges the imported set with the
/// replica like any other offline edit.
pub fn import_backup(state: &AppState, json: &str) -> Result<ImportStats> {
    let bundle = BackupBundle::from_json(json)?;
    let stats = state.lock_store()?.import_bundle(bundle)?;
    Ok(stats)
}

pub async fn import_backup_file(state: &AppState, path: &Path) -> Result<ImportStats> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(StoreError::from)?;
    let stats = import_backup(state, &json)?;
    info!(
        path = %path.display(),
        clients = stats.clients_imported,
        servers = stats.servers_imported,
        "Backup imported"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tally_shared::{status, Client, ClientDraft, PaymentState, Server, ServerDraft};

    use super::*;
    use crate::commands::{clients, servers};
    use crate::error::CommandError;

    async fn seeded() -> AppState {
        let state = AppState::in_memory(None, "tenant").unwrap();
        servers::create_server(
            &state,
            ServerDraft {
                name: "alpha".into(),
                base_cost: 10.0,
            },
        )
        .await
        .unwrap();
        let today = status::today();
        clients::create_client(
            &state,
            ClientDraft {
                name: "ana".into(),
                server: "alpha".into(),
                entry_date: today,
                due_date: today + Duration::days(10),
                amount: 30.0,
                payment_state: PaymentState::Paid,
                screens: 1,
                server_unit_cost: 8.0,
            },
        )
        .await
        .unwrap();
        state
    }

    #[tokio::test]
    async fn export_then_import_reproduces_entities() {
        let source = seeded().await;
        let json = export_backup(&source).unwrap();

        let target = AppState::in_memory(None, "tenant").unwrap();
        let stats = import_backup(&target, &json).unwrap();
        assert_eq!(stats.clients_imported, 1);
        assert_eq!(stats.servers_imported, 1);

        let store = source.store.lock().unwrap();
        assert_eq!(clients::list_clients(&target).unwrap(), store.all::<Client>());
        assert_eq!(servers::list_servers(&target).unwrap(), store.all::<Server>());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");

        let source = seeded().await;
        save_backup_to_file(&source, &path).await.unwrap();

        let target = AppState::in_memory(None, "tenant").unwrap();
        let stats = import_backup_file(&target, &path).await.unwrap();
        assert_eq!(stats.clients_imported, 1);
        assert_eq!(
            clients::list_clients(&target).unwrap(),
            clients::list_clients(&source).unwrap()
        );
    }

    #[test]
    fn invalid_document_leaves_store_untouched() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let err = import_backup(&state, r#"{"clients": []}"#).unwrap_err();
        assert!(matches!(err, CommandError::Store(StoreError::InvalidBackup(_))));
        assert!(clients::list_clients(&state).unwrap().is_empty());
    }
}
