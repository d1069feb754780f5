//! SQLite store for the PlayHub aggregator: accounts, games, play
//! sessions, friends, presence, and the sync audit log.

pub mod accounts;
pub mod friends;
pub mod games;
pub mod ids;
pub mod presence;
pub mod schema;
pub mod sessions;
pub mod sync_history;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

/// Thread-safe database handle wrapping a single SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Access the underlying connection with a closure.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&Connection) -> Result<R, DbError>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    /// Access the underlying connection mutably (for transactions).
    pub fn with_conn_mut<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<R, DbError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&mut conn)
    }

    fn configure(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
    }

    fn migrate(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            schema::run_migrations(conn)?;
            Ok(())
        })
    }
}

/// Database error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Extension trait for optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::accounts::{ConnectionStatus, account_id};
    use super::friends::Friend;
    use super::games::{SyncedGame, UpsertOutcome};
    use super::ids::{GameId, Platform, friend_id};
    use super::presence::{
        IntentMetadata, IntentState, PresenceState, VisibilityScope, WriteSource,
    };
    use super::sync_history::{SyncStatus, SyncType};
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test DB")
    }

    fn steam_account(db: &Database) -> String {
        let id = account_id(Platform::Steam, "7656119800");
        db.upsert_account(&id, Platform::Steam, "tester", Some("blob"))
            .unwrap();
        id
    }

    fn synced(native_id: &str, title: &str, playtime: i64) -> SyncedGame {
        SyncedGame {
            id: GameId::native(Platform::Steam, native_id),
            title: title.into(),
            playtime_seconds: Some(playtime),
            cover_url: Some(format!("https://cdn.example/{native_id}.jpg")),
            background_url: None,
            last_played_at: None,
            metadata_json: None,
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let db = test_db();
        assert!(db.get_accounts().unwrap().is_empty());
        // Running migrations twice must be a no-op.
        db.with_conn(|conn| schema::run_migrations(conn)).unwrap();
    }

    #[test]
    fn test_account_lifecycle() {
        let db = test_db();
        let id = steam_account(&db);

        let account = db.get_account(&id).unwrap().unwrap();
        assert_eq!(account.platform, Platform::Steam);
        assert_eq!(account.status, ConnectionStatus::Connected);
        assert_eq!(account.auth_blob.as_deref(), Some("blob"));

        // Re-auth updates in place, no duplicate row.
        db.upsert_account(&id, Platform::Steam, "renamed", Some("blob2"))
            .unwrap();
        assert_eq!(db.get_accounts().unwrap().len(), 1);
        let account = db.get_account(&id).unwrap().unwrap();
        assert_eq!(account.display_name, "renamed");
        assert_eq!(account.auth_blob.as_deref(), Some("blob2"));

        db.disconnect_account(&id).unwrap();
        let account = db.get_account(&id).unwrap().unwrap();
        assert_eq!(account.status, ConnectionStatus::Disconnected);
        assert!(account.auth_blob.is_none());
        assert!(db.get_connected_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_steam_disconnect_keeps_games() {
        let db = test_db();
        let id = steam_account(&db);
        db.upsert_synced_game(&id, &synced("100", "Foo", 0)).unwrap();

        db.disconnect_account(&id).unwrap();
        assert_eq!(db.get_games_for_account(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_gog_disconnect_cascades_games() {
        let db = test_db();
        let id = account_id(Platform::Gog, "u1");
        db.upsert_account(&id, Platform::Gog, "gog-user", Some("b"))
            .unwrap();
        db.upsert_synced_game(
            &id,
            &SyncedGame {
                id: GameId::native(Platform::Gog, "1207658924"),
                title: "The Witcher".into(),
                playtime_seconds: None,
                cover_url: None,
                background_url: None,
                last_played_at: None,
                metadata_json: None,
            },
        )
        .unwrap();
        let game_id = GameId::native(Platform::Gog, "1207658924").store_id();
        db.open_session(&game_id, Utc::now()).unwrap();

        db.disconnect_account(&id).unwrap();
        assert!(db.get_games_for_account(&id).unwrap().is_empty());
        assert!(db.get_sessions_for_game(&game_id).unwrap().is_empty());
    }

    #[test]
    fn test_sync_merge_is_idempotent() {
        let db = test_db();
        let id = steam_account(&db);

        let record = synced("42", "Foo", 3600);
        assert_eq!(
            db.upsert_synced_game(&id, &record).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            db.upsert_synced_game(&id, &record).unwrap(),
            UpsertOutcome::Updated
        );

        let games = db.get_games_for_account(&id).unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].id, "steam_42");
        assert_eq!(games[0].title, "Foo");
        assert_eq!(games[0].playtime_seconds, 3600);
    }

    #[test]
    fn test_sync_merge_preserves_user_fields() {
        let db = test_db();
        let id = steam_account(&db);
        db.upsert_synced_game(&id, &synced("42", "Foo", 3600)).unwrap();

        db.set_game_favorite("steam_42", true).unwrap();
        db.set_game_rating("steam_42", Some(5)).unwrap();
        db.set_game_notes("steam_42", "great co-op").unwrap();
        db.set_game_install_info("steam_42", Some("/games/foo"), Some("/games/foo/foo.exe"))
            .unwrap();

        // Another sync of the same record must not clobber the user edits.
        db.upsert_synced_game(&id, &synced("42", "Foo", 4000)).unwrap();

        let game = db.get_game("steam_42").unwrap().unwrap();
        assert!(game.favorite);
        assert_eq!(game.user_rating, Some(5));
        assert_eq!(game.notes, "great co-op");
        assert_eq!(game.install_path.as_deref(), Some("/games/foo"));
        assert_eq!(game.playtime_seconds, 4000);
    }

    #[test]
    fn test_provider_playtime_never_decreases() {
        let db = test_db();
        let id = steam_account(&db);
        db.upsert_synced_game(&id, &synced("42", "Foo", 3600)).unwrap();
        db.upsert_synced_game(&id, &synced("42", "Foo", 1000)).unwrap();
        assert_eq!(
            db.get_game("steam_42").unwrap().unwrap().playtime_seconds,
            3600
        );
    }

    #[test]
    fn test_batch_upsert_and_search() {
        let db = test_db();
        let id = steam_account(&db);
        let batch = vec![
            synced("1", "Half-Life 2", 100),
            synced("2", "Portal 2", 200),
            synced("3", "DOOM (2016)", 300),
        ];
        assert_eq!(db.upsert_synced_games(&id, &batch).unwrap(), 3);
        assert_eq!(db.upsert_synced_games(&id, &batch).unwrap(), 3);
        assert_eq!(db.get_games_for_account(&id).unwrap().len(), 3);

        let hits = db.search_games("half life").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "steam_1");
    }

    #[test]
    fn test_custom_game_and_rehoming() {
        let db = test_db();
        let placeholder = account_id(Platform::PlayHub, "local-scan");
        db.upsert_account(&placeholder, Platform::PlayHub, "Local", None)
            .unwrap();
        let custom = GameId::new_custom();
        db.insert_custom_game(&placeholder, &custom, "My Mod", Some("/mods/run.sh"))
            .unwrap();

        let real = account_id(Platform::Gog, "real-user");
        db.upsert_account(&real, Platform::Gog, "Real", Some("b")).unwrap();
        assert_eq!(db.reassign_account_games(&placeholder, &real).unwrap(), 1);

        let game = db.get_game(&custom.store_id()).unwrap().unwrap();
        assert_eq!(game.account_id, real);
        assert!(game.installed);
    }

    #[test]
    fn test_session_lifecycle_and_playtime() {
        let db = test_db();
        let id = steam_account(&db);
        db.upsert_synced_game(&id, &synced("100", "Foo", 0)).unwrap();

        let start = Utc::now() - Duration::seconds(30);
        let session_id = db.open_session("steam_100", start).unwrap();
        assert!(db.get_open_session("steam_100").unwrap().is_some());

        let duration = db.close_session(session_id, Utc::now()).unwrap();
        assert!((29..=31).contains(&duration));
        assert!(db.get_open_session("steam_100").unwrap().is_none());

        db.add_game_playtime("steam_100", duration).unwrap();
        db.add_game_playtime("steam_100", duration).unwrap();
        assert_eq!(
            db.get_game("steam_100").unwrap().unwrap().playtime_seconds,
            duration * 2
        );

        let history = db.get_sessions_for_game("steam_100").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration_seconds, Some(duration));
    }

    #[test]
    fn test_close_stale_sessions() {
        let db = test_db();
        let id = steam_account(&db);
        db.upsert_synced_game(&id, &synced("100", "Foo", 0)).unwrap();
        db.open_session("steam_100", Utc::now()).unwrap();
        db.open_session("steam_100", Utc::now()).unwrap();

        assert_eq!(db.close_stale_sessions(Utc::now(), 60).unwrap(), 2);
        assert!(db.get_open_session("steam_100").unwrap().is_none());
        for session in db.get_sessions_for_game("steam_100").unwrap() {
            assert_eq!(session.duration_seconds, Some(60));
        }
    }

    #[test]
    fn test_friends_upsert_is_additive() {
        let db = test_db();
        let mut friends = vec![
            Friend {
                id: friend_id(Platform::Steam, "f1"),
                platform: Platform::Steam,
                username: "alice".into(),
                avatar_url: String::new(),
                status: "online".into(),
                activity: String::new(),
            },
            Friend {
                id: friend_id(Platform::Steam, "f2"),
                platform: Platform::Steam,
                username: "bob".into(),
                avatar_url: "https://a/b.png".into(),
                status: "offline".into(),
                activity: String::new(),
            },
        ];
        db.upsert_friends(&friends).unwrap();

        // Next sync only sees alice, now in-game. Bob must survive.
        friends.truncate(1);
        friends[0].status = "in-game".into();
        friends[0].activity = "Playing Foo".into();
        db.upsert_friends(&friends).unwrap();

        let all = db.get_friends(Some(Platform::Steam)).unwrap();
        assert_eq!(all.len(), 2);
        let alice = db.get_friend(&friend_id(Platform::Steam, "f1")).unwrap().unwrap();
        assert_eq!(alice.status, "in-game");
        assert_eq!(alice.activity, "Playing Foo");
    }

    #[test]
    fn test_presence_lazy_init_and_coercion() {
        let db = test_db();
        let record = db.get_or_init_presence("me").unwrap();
        assert_eq!(record.presence_state, PresenceState::Online);
        assert_eq!(record.intent_state, IntentState::Idle);
        assert_eq!(record.visibility, VisibilityScope::Friends);
        assert_eq!(record.source, WriteSource::Auto);

        // Unknown stored values coerce to defaults on read.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE presence_status SET intent_state = 'speedrunning',
                        presence_state = 'lurking', visibility = 'everyone'
                 WHERE user_id = 'me'",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let record = db.get_presence("me").unwrap().unwrap();
        assert_eq!(record.intent_state, IntentState::Idle);
        assert_eq!(record.presence_state, PresenceState::Online);
        assert_eq!(record.visibility, VisibilityScope::Friends);
    }

    #[test]
    fn test_presence_save_round_trip() {
        let db = test_db();
        let mut record = db.get_or_init_presence("me").unwrap();
        record.intent_state = IntentState::OpenForCoop;
        record.intent_metadata = IntentMetadata {
            current_game_id: Some("steam_42".into()),
            joinable: Some(true),
            ..Default::default()
        };
        record.source = WriteSource::Manual;
        db.save_presence(&record).unwrap();

        let got = db.get_presence("me").unwrap().unwrap();
        assert_eq!(got, record);
    }

    #[test]
    fn test_sync_history_terminal_states() {
        let db = test_db();
        let ok = db.begin_sync(Platform::Steam, SyncType::Full, Utc::now()).unwrap();
        let bad = db.begin_sync(Platform::Epic, SyncType::Friends, Utc::now()).unwrap();

        assert_eq!(
            db.get_sync_run(ok).unwrap().unwrap().status,
            SyncStatus::InProgress
        );

        db.complete_sync(ok, 12, None, Utc::now()).unwrap();
        db.complete_sync(bad, 0, Some("timeout talking to epic"), Utc::now())
            .unwrap();

        let ok_run = db.get_sync_run(ok).unwrap().unwrap();
        assert_eq!(ok_run.status, SyncStatus::Success);
        assert_eq!(ok_run.items_synced, 12);
        assert!(ok_run.completed_at.is_some());

        let bad_run = db.get_sync_run(bad).unwrap().unwrap();
        assert_eq!(bad_run.status, SyncStatus::Failed);
        assert_eq!(bad_run.error.as_deref(), Some("timeout talking to epic"));

        let recent = db.get_recent_syncs(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, bad);
    }
}
