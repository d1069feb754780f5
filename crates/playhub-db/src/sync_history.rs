//! Append-only sync audit log. Status is the only field mutated after
//! insert, and only once: in_progress -> success | failed.

use chrono::{DateTime, Utc};

use crate::ids::Platform;
use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Full,
    Friends,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Friends => "friends",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    InProgress,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> SyncStatus {
        match s {
            "success" => SyncStatus::Success,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub platform: String,
    pub sync_type: String,
    pub status: SyncStatus,
    pub items_synced: i64,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl Database {
    pub fn begin_sync(
        &self,
        platform: Platform,
        sync_type: SyncType,
        started_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_history (platform, sync_type, status, started_at)
                 VALUES (?1, ?2, 'in_progress', ?3)",
                rusqlite::params![
                    platform.as_str(),
                    sync_type.as_str(),
                    started_at.to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Terminal write for a run. `error = None` means success.
    pub fn complete_sync(
        &self,
        id: i64,
        items_synced: i64,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let status = if error.is_some() {
            SyncStatus::Failed
        } else {
            SyncStatus::Success
        };
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_history SET status = ?2, items_synced = ?3, error = ?4,
                                         completed_at = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    status.as_str(),
                    items_synced,
                    error,
                    completed_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SYNC_SELECT} WHERE id = ?1"))?;
            let run = stmt.query_row([id], row_to_run).optional()?;
            Ok(run)
        })
    }

    pub fn get_recent_syncs(&self, limit: usize) -> Result<Vec<SyncRun>, DbError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SYNC_SELECT} ORDER BY id DESC LIMIT ?1"))?;
            let runs = stmt
                .query_map([limit], row_to_run)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }
}

const SYNC_SELECT: &str = "SELECT id, platform, sync_type, status, items_synced, error,
        started_at, completed_at
 FROM sync_history";

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    let status: String = row.get(3)?;
    Ok(SyncRun {
        id: row.get(0)?,
        platform: row.get(1)?,
        sync_type: row.get(2)?,
        status: SyncStatus::parse(&status),
        items_synced: row.get(4)?,
        error: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}
