//! Client configuration loaded from environment variables.
//!
//! Everything has a default; with no variables set the client runs
//! local-only against the platform data directory.

use std::path::PathBuf;
use std::time::Duration;

use tally_shared::constants::DEFAULT_TENANT_ID;
use tally_sync::firestore::DEFAULT_BASE_URL;
use tally_sync::FirestoreConfig;

/// Values shipped in the sample environment file. They mean "not set".
const PLACEHOLDERS: [&str; 2] = ["your-api-key", "your-project-id"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding `tally.db`.
    /// Env: `TALLY_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Tenant stamped on every remote document.
    /// Env: `TALLY_TENANT_ID`
    /// Default: `default-user`
    pub tenant_id: String,

    /// Env: `FIRESTORE_PROJECT_ID`
    pub firestore_project_id: Option<String>,

    /// Env: `FIRESTORE_API_KEY`
    pub firestore_api_key: Option<String>,

    /// Env: `FIRESTORE_BASE_URL`
    /// Default: `https://firestore.googleapis.com/v1`
    pub firestore_base_url: String,

    /// Change-feed poll interval of the REST backend.
    /// Env: `TALLY_POLL_INTERVAL_SECS`
    /// Default: `15`
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            firestore_project_id: None,
            firestore_api_key: None,
            firestore_base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(15),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = get("TALLY_DATA_DIR").filter(|d| !d.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(tenant) = get("TALLY_TENANT_ID") {
            if tenant.trim().is_empty() {
                tracing::warn!("Empty TALLY_TENANT_ID, using default");
            } else {
                config.tenant_id = tenant.trim().to_string();
            }
        }

        config.firestore_project_id = get("FIRESTORE_PROJECT_ID").and_then(configured);
        config.firestore_api_key = get("FIRESTORE_API_KEY").and_then(configured);

        if let Some(url) = get("FIRESTORE_BASE_URL").filter(|u| !u.is_empty()) {
            config.firestore_base_url = url;
        }

        if let Some(val) = get("TALLY_POLL_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %val, "Invalid TALLY_POLL_INTERVAL_SECS, using default");
                }
            }
        }

        config
    }

    /// Firestore settings, if both project id and API key are set.
    pub fn firestore(&self) -> Option<FirestoreConfig> {
        let project = self.firestore_project_id.as_ref()?;
        let key = self.firestore_api_key.as_ref()?;
        let mut fs = FirestoreConfig::new(project.clone(), key.clone());
        fs.base_url = self.firestore_base_url.clone();
        fs.poll_interval = self.poll_interval;
        Some(fs)
    }

    pub fn remote_configured(&self) -> bool {
        self.firestore().is_some()
    }
}

fn configured(value: String) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || PLACEHOLDERS.contains(&value) {
        None
    } else {
        Some(value.to_string())
    }
}
