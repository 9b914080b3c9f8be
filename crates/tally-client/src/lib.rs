//! # tally-client
//!
//! Application layer of the billing tracker:
//! - **Domain commands** over clients, servers and audit logs, applied to
//!   the local store first and then pushed to the remote replica
//! - **Audit log emitter** shared by every mutating command
//! - **Configuration** from environment variables
//! - **Sync control** on top of the reconciliation engine

pub mod audit;
pub mod commands;
pub mod config;
pub mod error;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::AppConfig;
pub use error::{CommandError, Result};
pub use state::AppState;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the
/// built-in filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tally=info,tally_client=debug,tally_sync=debug,tally_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
