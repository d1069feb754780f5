//! Game library storage and the idempotent sync merge.

use crate::ids::{GameId, normalize_title};
use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone)]
pub struct Game {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub normalized_title: String,
    pub install_path: Option<String>,
    pub executable_path: Option<String>,
    pub installed: bool,
    pub playtime_seconds: i64,
    pub last_played_at: Option<String>,
    pub cover_url: String,
    pub background_url: String,
    /// Platform-sourced blob: developer, publisher, genres, screenshots.
    pub metadata_json: String,
    pub hltb_main_minutes: Option<i64>,
    pub hltb_completionist_minutes: Option<i64>,
    pub user_rating: Option<i64>,
    pub favorite: bool,
    pub notes: String,
}

/// One normalized library record coming out of a provider fetch.
#[derive(Debug, Clone)]
pub struct SyncedGame {
    pub id: GameId,
    pub title: String,
    /// Provider's cumulative total, if it reports one.
    pub playtime_seconds: Option<i64>,
    pub cover_url: Option<String>,
    pub background_url: Option<String>,
    pub last_played_at: Option<String>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl Database {
    /// Merge one fetched record. Identity is the store id derived from
    /// (platform, native id) — never the title. Updates touch play-affecting
    /// and display fields only; favorite, rating, notes, and install info
    /// are user-authored and survive every sync. Provider playtime never
    /// lowers the stored total.
    pub fn upsert_synced_game(
        &self,
        account_id: &str,
        game: &SyncedGame,
    ) -> Result<UpsertOutcome, DbError> {
        self.with_conn(|conn| upsert_in_conn(conn, account_id, game))
    }

    /// Merge a whole fetched library in one transaction.
    pub fn upsert_synced_games(
        &self,
        account_id: &str,
        games: &[SyncedGame],
    ) -> Result<usize, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut merged = 0;
            for game in games {
                upsert_in_conn(&tx, account_id, game)?;
                merged += 1;
            }
            tx.commit()?;
            Ok(merged)
        })
    }

    /// Manually added entry on the local account.
    pub fn insert_custom_game(
        &self,
        account_id: &str,
        id: &GameId,
        title: &str,
        executable_path: Option<&str>,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO games (id, account_id, title, normalized_title,
                                    executable_path, installed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5 IS NOT NULL)",
                rusqlite::params![
                    id.store_id(),
                    account_id,
                    title,
                    normalize_title(title),
                    executable_path
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_game(&self, id: &str) -> Result<Option<Game>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{GAME_SELECT} WHERE id = ?1"))?;
            let game = stmt.query_row([id], row_to_game).optional()?;
            Ok(game)
        })
    }

    pub fn get_games_for_account(&self, account_id: &str) -> Result<Vec<Game>, DbError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{GAME_SELECT} WHERE account_id = ?1 ORDER BY title"))?;
            let games = stmt
                .query_map([account_id], row_to_game)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(games)
        })
    }

    /// Title search over the normalized index.
    pub fn search_games(&self, query: &str) -> Result<Vec<Game>, DbError> {
        let needle = format!("%{}%", normalize_title(query));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{GAME_SELECT} WHERE normalized_title LIKE ?1 ORDER BY title"
            ))?;
            let games = stmt
                .query_map([needle.as_str()], row_to_game)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(games)
        })
    }

    /// Re-home games from a placeholder account to a real one (GOG scan
    /// entries re-attached after authentication). Explicit, allowed mutation.
    pub fn reassign_account_games(
        &self,
        from_account: &str,
        to_account: &str,
    ) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE games SET account_id = ?2, updated_at = datetime('now')
                 WHERE account_id = ?1",
                rusqlite::params![from_account, to_account],
            )?;
            Ok(n)
        })
    }

    /// Session-close accumulation for session-authoritative platforms.
    pub fn add_game_playtime(&self, id: &str, seconds: i64) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET playtime_seconds = playtime_seconds + ?2,
                                  updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, seconds.max(0)],
            )?;
            Ok(())
        })
    }

    pub fn set_game_last_played(&self, id: &str, at: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET last_played_at = ?2, updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, at],
            )?;
            Ok(())
        })
    }

    pub fn set_game_install_info(
        &self,
        id: &str,
        install_path: Option<&str>,
        executable_path: Option<&str>,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET install_path = ?2, executable_path = ?3,
                                  installed = ?2 IS NOT NULL OR ?3 IS NOT NULL,
                                  updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, install_path, executable_path],
            )?;
            Ok(())
        })
    }

    pub fn set_game_favorite(&self, id: &str, favorite: bool) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET favorite = ?2 WHERE id = ?1",
                rusqlite::params![id, favorite],
            )?;
            Ok(())
        })
    }

    pub fn set_game_rating(&self, id: &str, rating: Option<i64>) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET user_rating = ?2 WHERE id = ?1",
                rusqlite::params![id, rating],
            )?;
            Ok(())
        })
    }

    pub fn set_game_notes(&self, id: &str, notes: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE games SET notes = ?2 WHERE id = ?1",
                rusqlite::params![id, notes],
            )?;
            Ok(())
        })
    }
}

fn upsert_in_conn(
    conn: &rusqlite::Connection,
    account_id: &str,
    game: &SyncedGame,
) -> Result<UpsertOutcome, DbError> {
    let store_id = game.id.store_id();
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM games WHERE id = ?1)",
        [store_id.as_str()],
        |row| row.get(0),
    )?;

    if exists {
        conn.execute(
            "UPDATE games SET
                 title = ?2,
                 normalized_title = ?3,
                 playtime_seconds = MAX(playtime_seconds, COALESCE(?4, playtime_seconds)),
                 cover_url = COALESCE(?5, cover_url),
                 background_url = COALESCE(?6, background_url),
                 last_played_at = COALESCE(?7, last_played_at),
                 metadata_json = COALESCE(?8, metadata_json),
                 updated_at = datetime('now')
             WHERE id = ?1",
            rusqlite::params![
                store_id,
                game.title,
                normalize_title(&game.title),
                game.playtime_seconds,
                game.cover_url,
                game.background_url,
                game.last_played_at,
                game.metadata_json,
            ],
        )?;
        Ok(UpsertOutcome::Updated)
    } else {
        conn.execute(
            "INSERT INTO games (id, account_id, title, normalized_title,
                                playtime_seconds, cover_url, background_url,
                                last_played_at, metadata_json)
             VALUES (?1, ?2, ?3, ?4, COALESCE(?5, 0), COALESCE(?6, ''),
                     COALESCE(?7, ''), ?8, COALESCE(?9, '{}'))",
            rusqlite::params![
                store_id,
                account_id,
                game.title,
                normalize_title(&game.title),
                game.playtime_seconds,
                game.cover_url,
                game.background_url,
                game.last_played_at,
                game.metadata_json,
            ],
        )?;
        Ok(UpsertOutcome::Inserted)
    }
}

const GAME_SELECT: &str = "SELECT id, account_id, title, normalized_title, install_path,
        executable_path, installed, playtime_seconds, last_played_at, cover_url,
        background_url, metadata_json, hltb_main_minutes, hltb_completionist_minutes,
        user_rating, favorite, notes
 FROM games";

fn row_to_game(row: &rusqlite::Row<'_>) -> rusqlite::Result<Game> {
    Ok(Game {
        id: row.get(0)?,
        account_id: row.get(1)?,
        title: row.get(2)?,
        normalized_title: row.get(3)?,
        install_path: row.get(4)?,
        executable_path: row.get(5)?,
        installed: row.get(6)?,
        playtime_seconds: row.get(7)?,
        last_played_at: row.get(8)?,
        cover_url: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        background_url: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        metadata_json: row.get(11)?,
        hltb_main_minutes: row.get(12)?,
        hltb_completionist_minutes: row.get(13)?,
        user_rating: row.get(14)?,
        favorite: row.get(15)?,
        notes: row.get::<_, Option<String>>(16)?.unwrap_or_default(),
    })
}
