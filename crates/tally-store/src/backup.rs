use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tally_shared::constants::BACKUP_FORMAT_VERSION;
use tally_shared::{Client, Server};

use crate::error::{Result, StoreError};
use crate::store::LocalStore;

/// Portable export of clients and servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub clients: Vec<Client>,
    pub servers: Vec<Server>,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    BACKUP_FORMAT_VERSION.to_string()
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImportStats {
    pub clients_imported: usize,
    pub servers_imported: usize,
}

impl BackupBundle {
    /// Parse a backup document, rejecting anything without both arrays.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        for field in ["clients", "servers"] {
            match value.get(field) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(StoreError::InvalidBackup(format!("`{field}` is not an array")))
                }
                None => return Err(StoreError::InvalidBackup(format!("missing `{field}`"))),
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl LocalStore {
    /// Snapshot clients and servers into a bundle.
    pub fn export_bundle(&self) -> BackupBundle {
        BackupBundle {
            clients: self.all::<Client>().to_vec(),
            servers: self.all::<Server>().to_vec(),
            exported_at: Utc::now(),
            version: BACKUP_FORMAT_VERSION.to_string(),
        }
    }

    /// Replace clients and servers with the bundle contents.
    ///
    /// Both blobs are rewritten in the persisted shape before the in-memory
    /// tables are reloaded from disk.
    pub fn import_bundle(&mut self, bundle: BackupBundle) -> Result<ImportStats> {
        let stats = ImportStats {
            clients_imported: bundle.clients.len(),
            servers_imported: bundle.servers.len(),
        };

        self.database().save_collection(&bundle.clients)?;
        self.database().save_collection(&bundle.servers)?;
        self.reload()?;

        tracing::info!(
            clients = stats.clients_imported,
            servers = stats.servers_imported,
            "Backup imported"
        );

        Ok(stats)
    }

    /// Parse and import a backup document in one step.
    pub fn import_bundle_json(&mut self, json: &str) -> Result<ImportStats> {
        let bundle = BackupBundle::from_json(json)?;
        self.import_bundle(bundle)
    }
}
