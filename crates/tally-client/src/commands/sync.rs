use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use tally_sync::SyncStatus;

use crate::commands::clients::refresh_statuses;
use crate::state::AppState;

/// Run one full reconciliation and install live listeners.
pub async fn initialize_sync(state: &AppState) -> SyncStatus {
    let status = state.engine.initialize().await;
    info!(%status, listeners = state.engine.listener_count(), "Sync initialized");
    status
}

/// Tear down listeners and reconcile again.
pub async fn reconnect(state: &AppState) -> SyncStatus {
    let status = state.engine.reconnect().await;
    info!(%status, "Sync reconnected");
    status
}

pub fn sync_status(state: &AppState) -> SyncStatus {
    state.engine.status()
}

/// Keep the session alive until `stop` resolves: refresh client statuses
/// every `every`, and report engine status changes to `on_status`.
/// Listeners are stopped on return.
pub async fn watch(
    state: &AppState,
    every: Duration,
    stop: impl Future<Output = ()>,
    mut on_status: impl FnMut(SyncStatus),
) {
    let mut status_rx = state.engine.subscribe_status();
    let mut ticker = tokio::time::interval(every);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                match refresh_statuses(state) {
                    Ok(changed) => debug!(changed, "Status refresh tick"),
                    Err(e) => warn!(error = %e, "Status refresh failed"),
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                on_status(status);
            }
        }
    }

    state.engine.shutdown();
    info!("Watch stopped");
}
