//! Shared engine state: the store handle, config, event channel, shutdown
//! token, and the in-memory coordination maps.
//!
//! Constructed once at process start and passed by clone; there are no
//! global singletons. The maps live for the process lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use playhub_db::Database;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::events::EngineEvent;

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

struct SharedStateInner {
    db: Database,
    config: RwLock<EngineConfig>,
    events_tx: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
    /// Account ids with a sync currently in flight. Serializes manual and
    /// auto syncs per account.
    syncs_in_flight: Mutex<HashSet<String>>,
    /// One watcher per game with a live session, keyed by the session id
    /// that owns it.
    session_watchers: Mutex<HashMap<String, (i64, CancellationToken)>>,
}

impl SharedState {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(SharedStateInner {
                db,
                config: RwLock::new(config),
                events_tx,
                shutdown: CancellationToken::new(),
                syncs_in_flight: Mutex::new(HashSet::new()),
                session_watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, EngineConfig> {
        self.inner.config.read().await
    }

    pub async fn update_config<F: FnOnce(&mut EngineConfig)>(&self, f: F) {
        let mut config = self.inner.config.write().await;
        f(&mut config);
    }

pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Fire an event; nobody listening is fine.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Claim the per-account sync slot. Returns `None` while another sync
    /// for the same account is running; the guard releases on drop.
    pub fn try_begin_sync(&self, account_id: &str) -> Option<SyncGuard> {
        let mut in_flight = self
            .inner
            .syncs_in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(account_id.to_string()) {
            return None;
        }
        Some(SyncGuard {
            state: self.clone(),
            account_id: account_id.to_string(),
        })
    }

    /// Register a session watcher, cancelling any previous watcher for the
    /// same game.
    pub fn register_watcher(&self, game_id: &str, session_id: i64) -> CancellationToken {
        let token = self.inner.shutdown.child_token();
        let mut watchers = self
            .inner
            .session_watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some((_, previous)) = watchers.insert(game_id.to_string(), (session_id, token.clone()))
        {
            previous.cancel();
        }
        token
    }

    /// Drop the watcher entry, but only if `session_id` still owns it. A
    /// stale watcher racing a relaunch must not evict its replacement.
    pub fn remove_watcher(&self, game_id: &str, session_id: i64) {
        let mut watchers = self
            .inner
            .session_watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if watchers.get(game_id).is_some_and(|(owner, _)| *owner == session_id) {
            watchers.remove(game_id);
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner
            .session_watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// RAII release of the per-account sync slot.
pub struct SyncGuard {
    state: SharedState,
    account_id: String,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        let mut in_flight = self
            .state
            .inner
            .syncs_in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::new(
            Database::open_in_memory().unwrap(),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_sync_guard_serializes_per_account() {
        let state = state();
        let guard = state.try_begin_sync("steam_1").unwrap();
        assert!(state.try_begin_sync("steam_1").is_none());
        // Different account is unaffected.
        assert!(state.try_begin_sync("epic_1").is_some());
        drop(guard);
        assert!(state.try_begin_sync("steam_1").is_some());
    }

    #[test]
    fn test_watcher_registration_replaces_previous() {
        let state = state();
        let first = state.register_watcher("steam_1", 1);
        let second = state.register_watcher("steam_1", 2);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(state.watcher_count(), 1);

        state.remove_watcher("steam_1", 2);
        assert_eq!(state.watcher_count(), 0);
    }

    #[test]
    fn test_stale_watcher_cannot_evict_replacement() {
        let state = state();
        state.register_watcher("steam_1", 1);
        state.register_watcher("steam_1", 2);

        // The cancelled session-1 watcher winds down late; its removal
        // must leave the session-2 entry in place.
        state.remove_watcher("steam_1", 1);
        assert_eq!(state.watcher_count(), 1);

        state.remove_watcher("steam_1", 2);
        assert_eq!(state.watcher_count(), 0);
    }

    #[test]
    fn test_shutdown_cancels_watchers() {
        let state = state();
        let token = state.register_watcher("steam_1", 1);
        state.shutdown_token().cancel();
        assert!(token.is_cancelled());
    }
}
