//! Play session rows: one per launch.

use chrono::{DateTime, Utc};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone)]
pub struct PlaySession {
    pub id: i64,
    pub game_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_seconds: Option<i64>,
}

impl Database {
    /// Open a session row for a launch. Steady-state there is at most one
    /// open session per game; watchers close stragglers via timeout rather
    /// than this being enforced here.
    pub fn open_session(&self, game_id: &str, started_at: DateTime<Utc>) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO play_sessions (game_id, started_at) VALUES (?1, ?2)",
                rusqlite::params![game_id, started_at.to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Close a session. Duration is computed end minus start and clamped at
    /// zero for clock skew. Closing a session that is already closed is
    /// `NotFound`, so two racing closers cannot both account the duration.
    pub fn close_session(&self, id: i64, ended_at: DateTime<Utc>) -> Result<i64, DbError> {
        let session = self
            .get_session(id)?
            .ok_or_else(|| DbError::NotFound(format!("session {id}")))?;

        let started = DateTime::parse_from_rfc3339(&session.started_at)
            .map_err(|e| DbError::InvalidData(format!("bad started_at on session {id}: {e}")))?;
        let duration = (ended_at.timestamp() - started.timestamp()).max(0);

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE play_sessions SET ended_at = ?2, duration_seconds = ?3
                 WHERE id = ?1 AND ended_at IS NULL",
                rusqlite::params![id, ended_at.to_rfc3339(), duration],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound(format!("open session {id}")));
            }
            Ok(duration)
        })
    }

    pub fn get_session(&self, id: i64) -> Result<Option<PlaySession>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SESSION_SELECT} WHERE id = ?1"))?;
            let session = stmt.query_row([id], row_to_session).optional()?;
            Ok(session)
        })
    }

    pub fn get_open_session(&self, game_id: &str) -> Result<Option<PlaySession>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SESSION_SELECT} WHERE game_id = ?1 AND ended_at IS NULL
                 ORDER BY id DESC LIMIT 1"
            ))?;
            let session = stmt.query_row([game_id], row_to_session).optional()?;
            Ok(session)
        })
    }

    pub fn get_sessions_for_game(&self, game_id: &str) -> Result<Vec<PlaySession>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SESSION_SELECT} WHERE game_id = ?1 ORDER BY started_at DESC"
            ))?;
            let sessions = stmt
                .query_map([game_id], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
    }

    /// Close every open session left behind by a previous run, with the
    /// given fallback duration. Returns the number closed.
    pub fn close_stale_sessions(
        &self,
        now: DateTime<Utc>,
        fallback_seconds: i64,
    ) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE play_sessions SET ended_at = ?1, duration_seconds = ?2
                 WHERE ended_at IS NULL",
                rusqlite::params![now.to_rfc3339(), fallback_seconds],
            )?;
            Ok(n)
        })
    }
}

const SESSION_SELECT: &str =
    "SELECT id, game_id, started_at, ended_at, duration_seconds FROM play_sessions";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaySession> {
    Ok(PlaySession {
        id: row.get(0)?,
        game_id: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        duration_seconds: row.get(4)?,
    })
}
