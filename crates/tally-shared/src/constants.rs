/// Application name
pub const APP_NAME: &str = "Tally";

/// Tenant used when none is configured (single-user deployment)
pub const DEFAULT_TENANT_ID: &str = "default-user";

/// Version number written into every persisted collection blob
pub const STORAGE_VERSION: u32 = 0;

/// Version string written into exported backup bundles
pub const BACKUP_FORMAT_VERSION: &str = "1.0";

/// Audit logs older than this many days are pruned on every append
pub const LOG_RETENTION_DAYS: i64 = 15;

/// Maximum number of audit logs kept locally (oldest evicted first)
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Days added to the due date when a client is renewed
pub const RENEWAL_PERIOD_DAYS: u64 = 30;

/// Days used to derive the daily rate for delinquency interest
pub const INTEREST_BASIS_DAYS: f64 = 30.0;

/// Discount granted to a referrer per referred client
pub const REFERRAL_DISCOUNT: f64 = 20.0;

/// A client due within this many days is reported as `DUE_SOON`
pub const DUE_SOON_WINDOW_DAYS: i64 = 7;
