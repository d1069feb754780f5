//! Engine wiring and the request/response surface.
//!
//! One `Engine` per process: it owns the provider clients, the credential
//! vault, the session tracker, and the presence arbiter, and hands out the
//! operations an embedding surface (UI bridge, RPC) calls into.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::RngCore;

use playhub_db::Database;
use playhub_db::accounts::{Account, account_id};
use playhub_db::games::Game;
use playhub_db::ids::{GameId, Platform};
use playhub_db::presence::{PresenceRecord, WriteSource};
use playhub_db::sessions::PlaySession;
use playhub_db::sync_history::SyncRun;
use playhub_providers::epic::EpicClient;
use playhub_providers::gog::GogClient;
use playhub_providers::steam::SteamClient;
use playhub_providers::{Credential, Provider, ProviderError};

use crate::broadcast::{LogSink, PresenceBroadcaster, PresenceSink};
use crate::config::EngineConfig;
use crate::credentials::CredentialVault;
use crate::events::EngineEvent;
use crate::presence::{PresenceArbiter, PresenceWrite};
use crate::process::SystemProcessLister;
use crate::session::{SessionError, SessionTracker};
use crate::state::SharedState;
use crate::sync::{SyncError, SyncOutcome, sync_account};

/// Identity of the local user in the presence table.
const LOCAL_USER: &str = "local";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Db(#[from] playhub_db::DbError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct Engine {
    state: SharedState,
    vault: CredentialVault,
    steam: SteamClient,
    epic: EpicClient,
    gog: GogClient,
    arbiter: Arc<PresenceArbiter>,
    broadcaster: PresenceBroadcaster,
    tracker: SessionTracker<SystemProcessLister>,
    /// Outstanding OAuth state nonces, one per platform flow.
    pending_auth: Mutex<HashMap<Platform, String>>,
}

impl Engine {
    /// Build the whole engine from configuration: store, vault, clients,
    /// tracker, arbiter, broadcaster, and the background tasks.
    pub async fn start(config: EngineConfig) -> anyhow::Result<Arc<Engine>> {
        let data_dir = config.resolve_data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let db = Database::open(data_dir.join("playhub.db"))?;
        let vault = CredentialVault::open(&data_dir)?;

        // Sessions left open by a previous run get the fallback duration.
        let stale = db.close_stale_sessions(Utc::now(), config.fallback_close.as_secs() as i64)?;
        if stale > 0 {
            tracing::info!("Closed {stale} stale play session(s) from a previous run");
        }

        for key in config.missing_provider_settings() {
            tracing::warn!("Provider setting {key} is not configured");
        }

        let state = SharedState::new(db, config.clone());
        let engine = Self::assemble(state, vault, vec![Box::new(LogSink)]).await;
        tokio::spawn(crate::background::auto_sync_loop(engine.clone()));
        Ok(engine)
    }

    /// Wiring shared by `start` and the tests; no filesystem access.
    pub(crate) async fn assemble(
        state: SharedState,
        vault: CredentialVault,
        sinks: Vec<Box<dyn PresenceSink>>,
    ) -> Arc<Engine> {
        let config = state.config().await.clone();
        let redirect_uri = config.redirect_uri();

        let broadcaster = PresenceBroadcaster::spawn(
            state.db().clone(),
            sinks,
            config.broadcast_enabled,
            state.shutdown_token().child_token(),
        );
        let arbiter = Arc::new(PresenceArbiter::new(
            state.clone(),
            broadcaster.clone(),
            LOCAL_USER.to_string(),
        ));
        let tracker = SessionTracker::new(
            state.clone(),
            arbiter.clone(),
            Arc::new(SystemProcessLister),
        );

        Arc::new(Engine {
            steam: SteamClient::new(),
            epic: EpicClient::new(
                config.epic_client_id.clone(),
                config.epic_client_secret.clone(),
                redirect_uri.clone(),
            ),
            gog: GogClient::new(
                config.gog_client_id.clone(),
                config.gog_client_secret.clone(),
                redirect_uri,
            ),
            state,
            vault,
            arbiter,
            broadcaster,
            tracker,
            pending_auth: Mutex::new(HashMap::new()),
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.state.subscribe()
    }

    pub fn shutdown(&self) {
        self.state.shutdown_token().cancel();
    }

    // ----- accounts -----

    /// Start an OAuth flow: returns the URL to open in the auth window.
    pub fn begin_auth(&self, platform: Platform) -> Result<String, EngineError> {
        let nonce = auth_nonce();
        let url = match platform {
            Platform::Epic => self.epic.auth_url(&nonce)?,
            Platform::Gog => self.gog.auth_url(&nonce)?,
            _ => return Err(ProviderError::NotConfigured.into()),
        };
        self.pending_auth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(platform, nonce);
        Ok(url)
    }

    /// Finish an OAuth flow with the code and state echoed back on the
    /// redirect. Creates or reconnects the account and returns its id.
    pub async fn complete_auth(
        &self,
        platform: Platform,
        code: &str,
        state_nonce: &str,
    ) -> Result<String, EngineError> {
        let expected = self
            .pending_auth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&platform);
        if expected.as_deref() != Some(state_nonce) {
            return Err(ProviderError::StateMismatch.into());
        }

        let cred = match platform {
            Platform::Epic => self.epic.exchange_code(code).await?,
            Platform::Gog => self.gog.exchange_code(code).await?,
            _ => return Err(ProviderError::NotConfigured.into()),
        };
        match platform {
            Platform::Epic => self.register_account(&self.epic, platform, cred).await,
            Platform::Gog => self.register_account(&self.gog, platform, cred).await,
            _ => unreachable!(),
        }
    }

    /// Connect a Steam account. Steam has no OAuth flow here: the Web API
    /// key from configuration plus the user's 64-bit id are the credential.
    pub async fn connect_steam(&self, steam_id: &str) -> Result<String, EngineError> {
        let api_key = self.state.config().await.steam_api_key.clone();
        if api_key.is_empty() {
            return Err(ProviderError::NotConfigured.into());
        }
        let cred = Credential {
            access_token: api_key,
            refresh_token: String::new(),
            expires_at: 0,
            user_id: steam_id.to_string(),
        };
        self.register_account(&self.steam, Platform::Steam, cred)
            .await
    }

    async fn register_account<P: Provider>(
        &self,
        provider: &P,
        platform: Platform,
        cred: Credential,
    ) -> Result<String, EngineError> {
        let profile = provider.fetch_profile(&cred).await?;
        let cred = Credential {
            user_id: profile.user_id.clone(),
            ..cred
        };
        let blob = self
            .vault
            .seal(&cred)
            .map_err(|e| ProviderError::ExchangeFailed(e.to_string()))?;

        let id = account_id(platform, &profile.user_id);
        self.state
            .db()
            .upsert_account(&id, platform, &profile.display_name, Some(&blob))?;
        tracing::info!("Connected {platform} account {id} ({})", profile.display_name);
        self.state.emit(EngineEvent::Notification {
            message: format!("{} account connected: {}", platform, profile.display_name),
        });
        Ok(id)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, EngineError> {
        Ok(self.state.db().get_accounts()?)
    }

    pub fn disconnect_account(&self, id: &str) -> Result<(), EngineError> {
        self.state.db().disconnect_account(id)?;
        tracing::info!("Disconnected account {id}");
        Ok(())
    }

    // ----- sync -----

    /// Full sync for one account, dispatched to its platform's client.
    /// Manual and auto callers share this path.
    pub async fn sync_now(&self, account_id: &str) -> Result<SyncOutcome, EngineError> {
        let account = self
            .state
            .db()
            .get_account(account_id)?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;
        let outcome = match account.platform {
            Platform::Steam => {
                sync_account(&self.state, &self.vault, &self.steam, account_id).await?
            }
            Platform::Epic => {
                sync_account(&self.state, &self.vault, &self.epic, account_id).await?
            }
            Platform::Gog => sync_account(&self.state, &self.vault, &self.gog, account_id).await?,
            // Local accounts have nothing to pull.
            Platform::PlayHub => {
                return Err(SyncError::NoCredential(account_id.to_string()).into());
            }
        };
        Ok(outcome)
    }

    pub fn recent_syncs(&self, limit: usize) -> Result<Vec<SyncRun>, EngineError> {
        Ok(self.state.db().get_recent_syncs(limit)?)
    }

    // ----- library -----

    pub fn library(&self, account_id: &str) -> Result<Vec<Game>, EngineError> {
        Ok(self.state.db().get_games_for_account(account_id)?)
    }

    pub fn search_games(&self, query: &str) -> Result<Vec<Game>, EngineError> {
        Ok(self.state.db().search_games(query)?)
    }

    /// Manually add a game outside any platform library.
    pub fn add_custom_game(
        &self,
        title: &str,
        executable_path: Option<&str>,
    ) -> Result<String, EngineError> {
        let local = account_id(Platform::PlayHub, LOCAL_USER);
        self.state
            .db()
            .upsert_account(&local, Platform::PlayHub, "Local", None)?;
        let id = GameId::new_custom();
        self.state
            .db()
            .insert_custom_game(&local, &id, title, executable_path)?;
        Ok(id.store_id())
    }

    /// Move games from one account to another, e.g. local placeholder
    /// entries onto a freshly authenticated account for the same library.
    pub fn rehome_games(&self, from_account: &str, to_account: &str) -> Result<usize, EngineError> {
        let moved = self
            .state
            .db()
            .reassign_account_games(from_account, to_account)?;
        tracing::info!("Re-homed {moved} game(s) from {from_account} to {to_account}");
        Ok(moved)
    }

    // ----- sessions -----

    pub async fn launch_game(&self, game_id: &str) -> Result<i64, EngineError> {
        Ok(self.tracker.launch(game_id).await?)
    }

    pub fn current_session(&self, game_id: &str) -> Result<Option<PlaySession>, EngineError> {
        Ok(self.tracker.current_session(game_id)?)
    }

    pub fn session_history(&self, game_id: &str) -> Result<Vec<PlaySession>, EngineError> {
        Ok(self.tracker.session_history(game_id)?)
    }

    // ----- presence -----

    pub fn get_presence(&self) -> Result<PresenceRecord, EngineError> {
        Ok(self.arbiter.get()?)
    }

    /// Explicit user-driven presence write.
    pub fn set_presence(&self, write: PresenceWrite) -> Result<PresenceRecord, EngineError> {
        Ok(self.arbiter.write(write, WriteSource::Manual)?)
    }

    pub async fn set_broadcast_enabled(&self, enabled: bool) {
        self.state.update_config(|c| c.broadcast_enabled = enabled).await;
        self.broadcaster.set_enabled(enabled);
        tracing::info!("Presence broadcast {}", if enabled { "enabled" } else { "disabled" });
    }
}

fn auth_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use playhub_db::accounts::ConnectionStatus;

    use super::*;

    async fn engine() -> Arc<Engine> {
        let state = SharedState::new(
            Database::open_in_memory().unwrap(),
            EngineConfig::default(),
        );
        Engine::assemble(state, CredentialVault::with_key([3u8; 32]), Vec::new()).await
    }

    #[tokio::test]
    async fn test_begin_auth_unconfigured_is_typed_failure() {
        let engine = engine().await;
        let err = engine.begin_auth(Platform::Epic).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Provider(ProviderError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_complete_auth_rejects_unknown_state() {
        let engine = engine().await;
        let err = engine
            .complete_auth(Platform::Epic, "code", "bogus-nonce")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Provider(ProviderError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn test_custom_game_lifecycle() {
        let engine = engine().await;
        let id = engine.add_custom_game("Tetris Clone", None).unwrap();
        assert!(id.starts_with("custom_"));

        let found = engine.search_games("tetris").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        // The local account exists and holds the game.
        let local = account_id(Platform::PlayHub, LOCAL_USER);
        let library = engine.library(&local).unwrap();
        assert_eq!(library.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_local_account_is_rejected() {
        let engine = engine().await;
        let local = account_id(Platform::PlayHub, LOCAL_USER);
        engine
            .state()
            .db()
            .upsert_account(&local, Platform::PlayHub, "Local", None)
            .unwrap();

        let err = engine.sync_now(&local).await.unwrap_err();
        assert!(matches!(err, EngineError::Sync(SyncError::NoCredential(_))));
    }

    #[tokio::test]
    async fn test_disconnect_marks_account() {
        let engine = engine().await;
        engine
            .state()
            .db()
            .upsert_account("steam_1", Platform::Steam, "P1", Some("blob"))
            .unwrap();
        engine.disconnect_account("steam_1").unwrap();

        let account = engine.state().db().get_account("steam_1").unwrap().unwrap();
        assert_eq!(account.status, ConnectionStatus::Disconnected);
        assert!(account.auth_blob.is_none());
    }

    #[tokio::test]
    async fn test_manual_presence_roundtrip() {
        let engine = engine().await;
        let record = engine
            .set_presence(PresenceWrite {
                intent_state: Some(playhub_db::presence::IntentState::StoryMode),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.intent_metadata.joinable, Some(false));
        assert_eq!(engine.get_presence().unwrap(), record);
    }
}
