//! Sync orchestrator: one end-to-end synchronization for one connected
//! account.
//!
//! Stages run in a fixed order (profile, friends, library, inventory) and
//! are independent: a failed stage is recorded and the run moves on. Every
//! run terminates its audit row exactly once, success or failed, no matter
//! which stage blew up.

use std::future::Future;

use chrono::Utc;

use playhub_db::accounts::Account;
use playhub_db::friends::Friend;
use playhub_db::games::SyncedGame;
use playhub_db::ids::{GameId, friend_id};
use playhub_db::sync_history::SyncType;
use playhub_providers::{Credential, Provider, ProviderError, RemoteFriend, RemoteGame};

use crate::credentials::CredentialVault;
use crate::events::EngineEvent;
use crate::state::SharedState;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("a sync for account {0} is already running")]
    AlreadyInProgress(String),

    #[error("account {0} has no usable credential")]
    NoCredential(String),

    #[error(transparent)]
    Db(#[from] playhub_db::DbError),
}

/// What one run did. `error` carries the last stage failure, if any; a run
/// with an error still keeps everything the other stages merged.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub run_id: i64,
    pub items_synced: i64,
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run a full sync for one account against its provider client.
///
/// Concurrent calls for the same account are rejected via the per-account
/// in-flight slot; different accounts sync freely in parallel.
pub async fn sync_account<P: Provider>(
    state: &SharedState,
    vault: &CredentialVault,
    provider: &P,
    account_id: &str,
) -> Result<SyncOutcome, SyncError> {
    let _guard = state
        .try_begin_sync(account_id)
        .ok_or_else(|| SyncError::AlreadyInProgress(account_id.to_string()))?;

    let account = state
        .db()
        .get_account(account_id)?
        .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;

    let cred = account
        .auth_blob
        .as_deref()
        .and_then(|blob| vault.unseal(blob))
        .ok_or_else(|| SyncError::NoCredential(account_id.to_string()))?;

    let run_id = state
        .db()
        .begin_sync(account.platform, SyncType::Full, Utc::now())?;
    tracing::info!(
        "Sync started for {} ({}), run {run_id}",
        account.id,
        account.platform
    );

    // Stage execution never early-returns; whatever happens inside, the
    // audit row below gets its single terminal write.
    let (items_synced, last_error) = run_stages(state, vault, provider, &account, cred).await;

    state
        .db()
        .complete_sync(run_id, items_synced, last_error.as_deref(), Utc::now())?;
    if last_error.is_none() {
        state
            .db()
            .touch_account_synced(&account.id, &Utc::now().to_rfc3339())?;
    }

    progress(state, &account, "Sync complete", 100);
    state.emit(EngineEvent::SyncCompleted {
        platform: account.platform.as_str().to_string(),
        success: last_error.is_none(),
        items_synced,
    });
    match &last_error {
        None => tracing::info!("Sync run {run_id} finished: {items_synced} items"),
        Some(e) => {
            tracing::warn!("Sync run {run_id} failed after {items_synced} items: {e}");
            state.emit(EngineEvent::Notification {
                message: format!("{} sync failed: {e}", account.platform),
            });
        }
    }

    Ok(SyncOutcome {
        run_id,
        items_synced,
        error: last_error,
    })
}

async fn run_stages<P: Provider>(
    state: &SharedState,
    vault: &CredentialVault,
    provider: &P,
    account: &Account,
    mut cred: Credential,
) -> (i64, Option<String>) {
    let mut items_synced: i64 = 0;
    let mut last_error: Option<String> = None;
    let mut refreshed = false;
    let fail = |stage: &str, e: String, slot: &mut Option<String>| {
        tracing::warn!("Sync stage '{stage}' failed for {}: {e}", account.id);
        *slot = Some(e);
    };

    progress(state, account, "Fetching profile", 10);
    let fetched = fetch_stage(state, vault, provider, account, &mut cred, &mut refreshed, |c| async move {
        provider.fetch_profile(&c).await
    })
    .await;
    match fetched {
        Ok(profile) => {
            // Display name can change remotely; the blob stays untouched.
            if let Err(e) = state.db().upsert_account(
                &account.id,
                account.platform,
                &profile.display_name,
                None,
            ) {
                fail("profile", e.to_string(), &mut last_error);
            }
        }
        Err(e) => fail("profile", e.to_string(), &mut last_error),
    }

    progress(state, account, "Syncing friends", 40);
    let fetched = fetch_stage(state, vault, provider, account, &mut cred, &mut refreshed, |c| async move {
        provider.fetch_friends(&c).await
    })
    .await;
    match fetched {
        Ok(remote) => {
            let friends: Vec<Friend> = remote
                .iter()
                .map(|f| normalize_friend(account, f))
                .collect();
            match state.db().upsert_friends(&friends) {
                Ok(count) => items_synced += count as i64,
                Err(e) => fail("friends", e.to_string(), &mut last_error),
            }
        }
        Err(e) => fail("friends", e.to_string(), &mut last_error),
    }

    progress(state, account, "Syncing library", 75);
    let fetched = fetch_stage(state, vault, provider, account, &mut cred, &mut refreshed, |c| async move {
        provider.fetch_library(&c).await
    })
    .await;
    match fetched {
        Ok(remote) => {
            let games: Vec<SyncedGame> =
                remote.iter().map(|g| normalize_game(account, g)).collect();
            match state.db().upsert_synced_games(&account.id, &games) {
                Ok(count) => items_synced += count as i64,
                Err(e) => fail("library", e.to_string(), &mut last_error),
            }
        }
        Err(e) => fail("library", e.to_string(), &mut last_error),
    }

    progress(state, account, "Syncing inventory", 90);
    let fetched = fetch_stage(state, vault, provider, account, &mut cred, &mut refreshed, |c| async move {
        provider.fetch_inventory(&c).await
    })
    .await;
    match fetched {
        Ok(items) => {
            // Entitlements feed the owned-content count only; there is no
            // per-item store surface yet.
            tracing::debug!("{} inventory items for {}", items.len(), account.id);
            items_synced += items.len() as i64;
        }
        Err(e) => fail("inventory", e.to_string(), &mut last_error),
    }

    (items_synced, last_error)
}

/// Run one stage fetch with the single-refresh policy: the first
/// auth-shaped failure of the run triggers a silent refresh, persists the
/// re-sealed credential, and retries that stage once. Later auth failures
/// surface as-is.
async fn fetch_stage<P, T, F, Fut>(
    state: &SharedState,
    vault: &CredentialVault,
    provider: &P,
    account: &Account,
    cred: &mut Credential,
    refreshed: &mut bool,
    fetch: F,
) -> Result<T, ProviderError>
where
    P: Provider,
    F: Fn(Credential) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match fetch(cred.clone()).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_auth_error() && !*refreshed => {
            *refreshed = true;
            tracing::info!("Auth failure for {}, attempting refresh: {e}", account.id);
            let new_cred = provider.refresh(cred).await?;
            match vault.seal(&new_cred) {
                Ok(blob) => {
                    if let Err(e) = state.db().update_account_auth_blob(&account.id, &blob) {
                        tracing::warn!("Failed to persist refreshed credential: {e}");
                    }
                }
                Err(e) => tracing::warn!("Failed to seal refreshed credential: {e}"),
            }
            *cred = new_cred;
            fetch(cred.clone()).await
        }
        Err(e) => Err(e),
    }
}

fn normalize_friend(account: &Account, remote: &RemoteFriend) -> Friend {
    Friend {
        id: friend_id(account.platform, &remote.external_id),
        platform: account.platform,
        username: remote.display_name.clone(),
        avatar_url: remote.avatar_url.clone(),
        status: remote.presence.clone(),
        activity: remote.activity.clone(),
    }
}

fn normalize_game(account: &Account, remote: &RemoteGame) -> SyncedGame {
    SyncedGame {
        id: GameId::native(account.platform, remote.native_id.clone()),
        title: remote.title.clone(),
        playtime_seconds: remote.playtime_seconds,
        cover_url: remote.cover_url.clone(),
        background_url: remote.background_url.clone(),
        last_played_at: remote.last_played_at.clone(),
        metadata_json: remote.metadata_json.clone(),
    }
}

fn progress(state: &SharedState, account: &Account, message: &str, percent: u8) {
    state.emit(EngineEvent::SyncProgress {
        platform: account.platform.as_str().to_string(),
        message: message.to_string(),
        percent,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use playhub_db::Database;
    use playhub_db::ids::Platform;
    use playhub_db::sync_history::SyncStatus;
    use playhub_providers::ProviderProfile;

    use crate::config::EngineConfig;

    use super::*;

    /// Scripted provider: per-stage results, plus a refresh that can be
    /// told to succeed or fail.
    struct FakeProvider {
        profile: Mutex<Vec<Result<ProviderProfile, ProviderError>>>,
        friends: Vec<RemoteFriend>,
        library: Vec<RemoteGame>,
        library_fails: bool,
        refresh_ok: bool,
        refresh_calls: AtomicUsize,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            Self {
                profile: Mutex::new(vec![Ok(ProviderProfile {
                    user_id: "u1".into(),
                    display_name: "Player One".into(),
                })]),
                friends: Vec::new(),
                library: Vec::new(),
                library_fails: false,
                refresh_ok: true,
                refresh_calls: AtomicUsize::new(0),
            }
        }
    }

    impl Provider for FakeProvider {
        fn platform_name(&self) -> &'static str {
            "steam"
        }

        async fn fetch_profile(
            &self,
            _cred: &Credential,
        ) -> Result<ProviderProfile, ProviderError> {
            let mut scripted = self.profile.lock().unwrap();
            if scripted.is_empty() {
                return Ok(ProviderProfile {
                    user_id: "u1".into(),
                    display_name: "Player One".into(),
                });
            }
            scripted.remove(0)
        }

        async fn fetch_friends(
            &self,
            _cred: &Credential,
        ) -> Result<Vec<RemoteFriend>, ProviderError> {
            Ok(self.friends.clone())
        }

        async fn fetch_library(&self, _cred: &Credential) -> Result<Vec<RemoteGame>, ProviderError> {
            if self.library_fails {
                return Err(ProviderError::Timeout);
            }
            Ok(self.library.clone())
        }

        async fn refresh(&self, cred: &Credential) -> Result<Credential, ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok(Credential {
                    access_token: "fresh".into(),
                    ..cred.clone()
                })
            } else {
                Err(ProviderError::TokenRefreshFailed("expired".into()))
            }
        }
    }

    fn harness() -> (SharedState, CredentialVault) {
        let state = SharedState::new(Database::open_in_memory().unwrap(), EngineConfig::default());
        (state, CredentialVault::with_key([7u8; 32]))
    }

    fn seed_account(state: &SharedState, vault: &CredentialVault) -> String {
        let cred = Credential {
            access_token: "tok".into(),
            refresh_token: "ref".into(),
            expires_at: 0,
            user_id: "u1".into(),
        };
        let blob = vault.seal(&cred).unwrap();
        state
            .db()
            .upsert_account("steam_u1", Platform::Steam, "Player One", Some(&blob))
            .unwrap();
        "steam_u1".to_string()
    }

    fn remote_game(native_id: &str, title: &str) -> RemoteGame {
        RemoteGame {
            native_id: native_id.into(),
            title: title.into(),
            playtime_seconds: Some(3600),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_run_records_success() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider {
            friends: vec![RemoteFriend {
                external_id: "f1".into(),
                display_name: "Friend".into(),
                ..Default::default()
            }],
            library: vec![remote_game("440", "Team Fortress 2"), remote_game("620", "Portal 2")],
            ..Default::default()
        };

        let outcome = sync_account(&state, &vault, &provider, &id).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.items_synced, 3);

        let run = state.db().get_sync_run(outcome.run_id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Success);
        assert_eq!(run.items_synced, 3);
        assert!(run.completed_at.is_some());

        let account = state.db().get_account(&id).unwrap().unwrap();
        assert!(account.last_synced_at.is_some());
        assert!(state.db().get_game("steam_440").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_abort_later_stages() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider {
            friends: vec![RemoteFriend {
                external_id: "f1".into(),
                display_name: "Friend".into(),
                ..Default::default()
            }],
            library_fails: true,
            ..Default::default()
        };

        let outcome = sync_account(&state, &vault, &provider, &id).await.unwrap();
        assert!(!outcome.succeeded());
        // The friends stage before the failure still merged.
        assert_eq!(outcome.items_synced, 1);
        assert_eq!(state.db().get_friends(None).unwrap().len(), 1);

        let run = state.db().get_sync_run(outcome.run_id).unwrap().unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert!(run.error.is_some());
        // A failed run does not advance the account's sync stamp.
        let account = state.db().get_account(&id).unwrap().unwrap();
        assert!(account.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_once_and_retries() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider {
            profile: Mutex::new(vec![
                Err(ProviderError::ApiError {
                    status: 401,
                    message: "token expired".into(),
                }),
                Ok(ProviderProfile {
                    user_id: "u1".into(),
                    display_name: "Player One".into(),
                }),
            ]),
            ..Default::default()
        };

        let outcome = sync_account(&state, &vault, &provider, &id).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);

        // The refreshed credential was re-sealed into the account row.
        let account = state.db().get_account(&id).unwrap().unwrap();
        let cred = vault.unseal(account.auth_blob.as_deref().unwrap()).unwrap();
        assert_eq!(cred.access_token, "fresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_as_failed_run_but_keeps_account() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider {
            profile: Mutex::new(vec![Err(ProviderError::ApiError {
                status: 401,
                message: "token expired".into(),
            })]),
            refresh_ok: false,
            ..Default::default()
        };

        let outcome = sync_account(&state, &vault, &provider, &id).await.unwrap();
        assert!(!outcome.succeeded());

        // The account stays connected for manual re-auth.
        let account = state.db().get_account(&id).unwrap().unwrap();
        assert_eq!(
            account.status,
            playhub_db::accounts::ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider {
            library: vec![remote_game("440", "Team Fortress 2")],
            ..Default::default()
        };

        sync_account(&state, &vault, &provider, &id).await.unwrap();
        sync_account(&state, &vault, &provider, &id).await.unwrap();

        assert_eq!(state.db().get_games_for_account(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_for_same_account_rejected() {
        let (state, vault) = harness();
        let id = seed_account(&state, &vault);
        let provider = FakeProvider::default();

        let _slot = state.try_begin_sync(&id).unwrap();
        let err = sync_account(&state, &vault, &provider, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyInProgress(_)));
        // No audit row for a rejected attempt.
        assert!(state.db().get_recent_syncs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_is_typed_failure() {
        let (state, vault) = harness();
        state
            .db()
            .upsert_account("steam_u1", Platform::Steam, "Player One", None)
            .unwrap();
        let provider = FakeProvider::default();

        let err = sync_account(&state, &vault, &provider, "steam_u1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoCredential(_)));
    }
}
