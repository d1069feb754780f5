//! Session tracker: "this game is running right now" without any help
//! from the launched process.
//!
//! Per launch: `Launching -> Watching -> Closed`. The handoff to the
//! platform launcher is fire-and-forget, so a per-game watcher task polls
//! the OS process list against the candidate executables found in the
//! install directory. Games whose install directory is unknown get a
//! fixed-timeout close instead of an open session that never ends.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use playhub_db::games::Game;
use playhub_db::ids::{GameId, Platform};
use playhub_db::sessions::PlaySession;

use crate::background::sleep_or_cancel;
use crate::events::EngineEvent;
use crate::presence::PresenceArbiter;
use crate::process::{ProcessLister, scan_executables};
use crate::state::SharedState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("game {0} not found")]
    GameNotFound(String),

    #[error(transparent)]
    Db(#[from] playhub_db::DbError),
}

pub struct SessionTracker<L: ProcessLister> {
    state: SharedState,
    arbiter: Arc<PresenceArbiter>,
    lister: Arc<L>,
}

impl<L: ProcessLister> Clone for SessionTracker<L> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            arbiter: self.arbiter.clone(),
            lister: self.lister.clone(),
        }
    }
}

impl<L: ProcessLister + 'static> SessionTracker<L> {
    pub fn new(state: SharedState, arbiter: Arc<PresenceArbiter>, lister: Arc<L>) -> Self {
        Self {
            state,
            arbiter,
            lister,
        }
    }

    /// Launch a game: open the session row, hand off to the platform
    /// launcher, and start the watcher. Returns the session row id.
    pub async fn launch(&self, game_id: &str) -> Result<i64, SessionError> {
        let game = self
            .state
            .db()
            .get_game(game_id)?
            .ok_or_else(|| SessionError::GameNotFound(game_id.to_string()))?;

        // A leftover open row for this game means its watcher is gone or
        // about to be replaced; close it against the new start time.
        let now = Utc::now();
        if let Some(stale) = self.state.db().get_open_session(game_id)? {
            tracing::debug!("Closing leftover open session {} for {game_id}", stale.id);
            self.state.db().close_session(stale.id, now)?;
        }

        self.state
            .db()
            .set_game_last_played(game_id, &now.to_rfc3339())?;
        let session_id = self.state.db().open_session(game_id, now)?;

        launch_handoff(&game);

        if let Err(e) = self.arbiter.on_session_start(game_id) {
            tracing::warn!("Presence update on session start failed: {e}");
        }
        self.state.emit(EngineEvent::SessionStarted {
            game_id: game_id.to_string(),
        });
        tracing::info!("Session {session_id} started for {game_id}");

        let token = self.state.register_watcher(game_id, session_id);
        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.watch(game, session_id, token).await;
        });

        Ok(session_id)
    }

    pub fn current_session(&self, game_id: &str) -> Result<Option<PlaySession>, SessionError> {
        Ok(self.state.db().get_open_session(game_id)?)
    }

    pub fn session_history(&self, game_id: &str) -> Result<Vec<PlaySession>, SessionError> {
        Ok(self.state.db().get_sessions_for_game(game_id)?)
    }

    /// Watching state. Returns once the session is closed or the watcher
    /// is cancelled (shutdown, or a relaunch replacing it).
    async fn watch(&self, game: Game, session_id: i64, token: CancellationToken) {
        let (poll_interval, fallback_close) = {
            let config = self.state.config().await;
            (config.poll_interval, config.fallback_close)
        };

        let candidates = game
            .install_path
            .as_deref()
            .map(|dir| scan_executables(dir.as_ref()))
            .unwrap_or_default();

        if candidates.is_empty() {
            // Cannot identify the process; close after the fixed timeout.
            tracing::debug!(
                "No candidate executables for {}, closing in {:?}",
                game.id,
                fallback_close
            );
            if sleep_or_cancel(&token, fallback_close).await {
                return;
            }
            self.close(&game, session_id).await;
            return;
        }

        // The launcher may take a while to actually start the process;
        // an empty poll only closes the session once the process has been
        // seen, or the startup window has passed.
        let mut seen = false;
        let startup_deadline = tokio::time::Instant::now() + fallback_close;
        loop {
            if sleep_or_cancel(&token, poll_interval).await {
                return;
            }
            match self.lister.running_names().await {
                Ok(running) => {
                    let alive = candidates.iter().any(|name| running.contains(name));
                    if alive {
                        seen = true;
                    } else if seen || tokio::time::Instant::now() >= startup_deadline {
                        break;
                    }
                }
                // Poll errors never close a session; retry next tick.
                Err(e) => tracing::warn!("Process poll failed for {}: {e}", game.id),
            }
        }
        self.close(&game, session_id).await;
    }

    /// Closed state: finalize the row, account playtime, reset presence.
    async fn close(&self, game: &Game, session_id: i64) {
        let now = Utc::now();
        let duration = match self.state.db().close_session(session_id, now) {
            Ok(duration) => duration,
            Err(playhub_db::DbError::NotFound(_)) => {
                // Someone else (relaunch, startup cleanup) closed it first.
                tracing::debug!("Session {session_id} was already closed");
                return;
            }
            Err(e) => {
                tracing::error!("Failed to close session {session_id}: {e}");
                return;
            }
        };

        let platform = GameId::parse(&game.id)
            .map(|id| id.platform())
            .unwrap_or(Platform::PlayHub);
        if !platform.playtime_from_provider() {
            if let Err(e) = self.state.db().add_game_playtime(&game.id, duration) {
                tracing::warn!("Failed to add playtime for {}: {e}", game.id);
            }
        }
        if let Err(e) = self
            .state
            .db()
            .set_game_last_played(&game.id, &now.to_rfc3339())
        {
            tracing::warn!("Failed to update last played for {}: {e}", game.id);
        }

        if let Err(e) = self.arbiter.on_session_end(&game.id) {
            tracing::warn!("Presence update on session end failed: {e}");
        }
        self.state.emit(EngineEvent::SessionEnded {
            game_id: game.id.clone(),
            duration_seconds: duration,
        });
        self.state.remove_watcher(&game.id, session_id);
        tracing::info!("Session {session_id} closed for {} ({duration}s)", game.id);
    }
}

/// Hand the actual start over to the owning platform. Nothing here reports
/// back; failures are logged and the watcher takes it from there.
fn launch_handoff(game: &Game) {
    match GameId::parse(&game.id) {
        Some(GameId::Native {
            platform: Platform::Steam,
            native_id,
        }) => open_uri(&format!("steam://run/{native_id}")),
        Some(GameId::Native {
            platform: Platform::Epic,
            native_id,
        }) => open_uri(&format!(
            "com.epicgames.launcher://apps/{native_id}?action=launch&silent=true"
        )),
        Some(GameId::Native {
            platform: Platform::Gog,
            native_id,
        }) => open_uri(&format!("goggalaxy://openGameView/{native_id}")),
        _ => spawn_executable(game),
    }
}

fn open_uri(uri: &str) {
    tracing::debug!("Launching via {uri}");
    if let Err(e) = open::that_detached(uri) {
        tracing::warn!("Launch handoff failed for {uri}: {e}");
    }
}

fn spawn_executable(game: &Game) {
    let Some(exe) = game.executable_path.as_deref().filter(|p| !p.is_empty()) else {
        tracing::warn!("No executable recorded for {}, nothing to launch", game.id);
        return;
    };
    let mut command = std::process::Command::new(exe);
    if let Some(dir) = exe.rsplit_once(['/', '\\']).map(|(dir, _)| dir) {
        command.current_dir(dir);
    }
    match command.spawn() {
        Ok(child) => tracing::debug!("Spawned {exe} (pid {})", child.id()),
        Err(e) => tracing::warn!("Failed to spawn {exe}: {e}"),
    }
}
