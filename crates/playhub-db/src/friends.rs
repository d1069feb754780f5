//! Platform-scoped friends list. Sync is additive-or-updating only; rows
//! are never hard-deleted by a sync run.

use crate::ids::Platform;
use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone)]
pub struct Friend {
    /// `{platform}_{external_id}`, or a generated id for local friends.
    pub id: String,
    pub platform: Platform,
    pub username: String,
    pub avatar_url: String,
    pub status: String,
    pub activity: String,
}

impl Database {
    /// Batch upsert inside one transaction (one sync stage's worth).
    pub fn upsert_friends(&self, friends: &[Friend]) -> Result<usize, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for friend in friends {
                upsert_in_conn(&tx, friend)?;
            }
            tx.commit()?;
            Ok(friends.len())
        })
    }

    pub fn get_friend(&self, id: &str) -> Result<Option<Friend>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{FRIEND_SELECT} WHERE id = ?1"))?;
            let friend = stmt.query_row([id], row_to_friend).optional()?;
            Ok(friend)
        })
    }

    pub fn get_friends(&self, platform: Option<Platform>) -> Result<Vec<Friend>, DbError> {
        self.with_conn(|conn| {
            let friends = match platform {
                Some(p) => {
                    let mut stmt = conn.prepare(&format!(
                        "{FRIEND_SELECT} WHERE platform = ?1 ORDER BY username"
                    ))?;
                    let rows = stmt.query_map([p.as_str()], row_to_friend)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!("{FRIEND_SELECT} ORDER BY username"))?;
                    let rows = stmt.query_map([], row_to_friend)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(friends)
        })
    }
}

fn upsert_in_conn(conn: &rusqlite::Connection, friend: &Friend) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO friends (id, platform, username, avatar_url, status, activity, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
             username = ?3,
             avatar_url = ?4,
             status = ?5,
             activity = ?6,
             updated_at = datetime('now')",
        rusqlite::params![
            friend.id,
            friend.platform.as_str(),
            friend.username,
            friend.avatar_url,
            friend.status,
            friend.activity,
        ],
    )?;
    Ok(())
}

const FRIEND_SELECT: &str =
    "SELECT id, platform, username, avatar_url, status, activity FROM friends";

fn row_to_friend(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friend> {
    let platform_str: String = row.get(1)?;
    Ok(Friend {
        id: row.get(0)?,
        platform: Platform::parse(&platform_str).unwrap_or(Platform::PlayHub),
        username: row.get(2)?,
        avatar_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        activity: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}
