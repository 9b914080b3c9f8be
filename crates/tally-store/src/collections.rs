//! Persisted collection blobs.
//!
//! Every collection is stored as `{"state": {"<field>": [...]}, "version": N}`.
//! Backup import writes the same shape, so a restored file and a live store
//! are indistinguishable on disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tally_shared::constants::STORAGE_VERSION;
use tally_shared::Record;

use crate::database::Database;
use crate::error::Result;

/// Key of the persisted authentication flag.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<S> {
    state: S,
    version: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthState {
    #[serde(default)]
    is_authenticated: bool,
}

/// Encode a collection in its persisted shape.
pub fn encode_collection<T: Record>(records: &[T]) -> Result<String> {
    let field = T::COLLECTION.state_field();
    let mut state = BTreeMap::new();
    state.insert(field, records);
    let envelope = Envelope {
        state,
        version: STORAGE_VERSION,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a persisted collection. A blob without the field yields an empty list.
pub fn decode_collection<T: Record>(blob: &str) -> Result<Vec<T>> {
    let mut envelope: Envelope<BTreeMap<String, Value>> = serde_json::from_str(blob)?;
    match envelope.state.remove(T::COLLECTION.state_field()) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(records) => Ok(serde_json::from_value(records)?),
    }
}

impl Database {
    /// Load every record of a collection. Missing blobs load as empty.
    pub fn load_collection<T: Record>(&self) -> Result<Vec<T>> {
        match self.read_blob(T::COLLECTION.storage_key())? {
            Some(blob) => decode_collection(&blob),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the whole collection blob.
    pub fn save_collection<T: Record>(&self, records: &[T]) -> Result<()> {
        let blob = encode_collection(records)?;
        self.write_blob(T::COLLECTION.storage_key(), &blob)?;
        tracing::trace!(
            collection = %T::COLLECTION,
            records = records.len(),
            bytes = blob.len(),
            "collection persisted"
        );
        Ok(())
    }

    /// Persisted authentication flag (`false` when never written).
    pub fn auth_flag(&self) -> Result<bool> {
        match self.read_blob(AUTH_STORAGE_KEY)? {
            Some(blob) => {
                let envelope: Envelope<AuthState> = serde_json::from_str(&blob)?;
                Ok(envelope.state.is_authenticated)
            }
            None => Ok(false),
        }
    }

    pub fn set_auth_flag(&self, is_authenticated: bool) -> Result<()> {
        let envelope = Envelope {
            state: AuthState { is_authenticated },
            version: STORAGE_VERSION,
        };
        self.write_blob(AUTH_STORAGE_KEY, &serde_json::to_string(&envelope)?)
    }
}
