//! Background tasks driven off the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use playhub_db::accounts::Account;
use playhub_db::ids::Platform;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::sync::SyncError;

pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Local PlayHub accounts hold manually added games; there is no remote
/// to pull from, so the sync pass skips them.
fn has_remote(account: &Account) -> bool {
    account.platform != Platform::PlayHub
}

/// Periodic full sync for every connected account. Per-account failures
/// are logged and the loop keeps going; the in-flight guard inside the
/// orchestrator keeps this from stepping on manual syncs.
pub async fn auto_sync_loop(engine: Arc<Engine>) {
    let state = engine.state().clone();
    let shutdown_token = state.shutdown_token().clone();

    // Let startup settle before the first pass.
    if sleep_or_cancel(&shutdown_token, Duration::from_secs(30)).await {
        tracing::info!("Auto-sync loop stopped (shutdown)");
        return;
    }

    loop {
        let accounts = match state.db().get_connected_accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!("Auto-sync could not list accounts: {e}");
                Vec::new()
            }
        };

        for account in accounts.iter().filter(|a| has_remote(a)) {
            if shutdown_token.is_cancelled() {
                tracing::info!("Auto-sync loop stopped (shutdown)");
                return;
            }
            match engine.sync_now(&account.id).await {
                Ok(outcome) if outcome.succeeded() => {
                    tracing::debug!("Auto-sync {}: {} items", account.id, outcome.items_synced);
                }
                Ok(outcome) => {
                    tracing::warn!(
                        "Auto-sync {} finished with error: {:?}",
                        account.id,
                        outcome.error
                    );
                }
                Err(crate::engine::EngineError::Sync(SyncError::AlreadyInProgress(_))) => {
                    tracing::debug!("Auto-sync {} skipped: already running", account.id);
                }
                Err(e) => tracing::warn!("Auto-sync {} failed: {e}", account.id),
            }
        }

        let interval = state.config().await.sync_interval_secs;
        if sleep_or_cancel(&shutdown_token, Duration::from_secs(interval)).await {
            tracing::info!("Auto-sync loop stopped (shutdown)");
            return;
        }
    }
}
