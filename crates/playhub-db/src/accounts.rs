//! Account storage: one row per (platform, external identity).

use serde::{Deserialize, Serialize};

use crate::ids::Platform;
use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    fn parse(s: &str) -> ConnectionStatus {
        match s {
            "connected" => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    /// Platform-prefixed id, e.g. `steam_76561198000000000`.
    pub id: String,
    pub platform: Platform,
    pub display_name: String,
    /// Encrypted credential blob (base64). `None` once disconnected.
    pub auth_blob: Option<String>,
    pub status: ConnectionStatus,
    pub last_synced_at: Option<String>,
}

/// Store key for an account.
pub fn account_id(platform: Platform, external_id: &str) -> String {
    format!("{}_{external_id}", platform.as_str())
}

impl Database {
    /// Create or refresh an account on successful auth. Re-auth of a known
    /// identity updates the blob and reconnects rather than duplicating.
    pub fn upsert_account(
        &self,
        id: &str,
        platform: Platform,
        display_name: &str,
        auth_blob: Option<&str>,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, platform, display_name, auth_blob, status)
                 VALUES (?1, ?2, ?3, ?4, 'connected')
                 ON CONFLICT(id) DO UPDATE SET
                     display_name = ?3,
                     auth_blob = COALESCE(?4, auth_blob),
                     status = 'connected'",
                rusqlite::params![id, platform.as_str(), display_name, auth_blob],
            )?;
            Ok(())
        })
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, platform, display_name, auth_blob, status, last_synced_at
                 FROM accounts WHERE id = ?1",
            )?;
            let account = stmt.query_row([id], row_to_account).optional()?;
            Ok(account)
        })
    }

    pub fn get_accounts(&self) -> Result<Vec<Account>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, platform, display_name, auth_blob, status, last_synced_at
                 FROM accounts ORDER BY id",
            )?;
            let accounts = stmt
                .query_map([], row_to_account)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(accounts)
        })
    }

    pub fn get_connected_accounts(&self) -> Result<Vec<Account>, DbError> {
        Ok(self
            .get_accounts()?
            .into_iter()
            .filter(|a| a.status == ConnectionStatus::Connected)
            .collect())
    }

    pub fn update_account_auth_blob(&self, id: &str, auth_blob: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET auth_blob = ?2 WHERE id = ?1",
                rusqlite::params![id, auth_blob],
            )?;
            Ok(())
        })
    }

    pub fn touch_account_synced(&self, id: &str, at: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET last_synced_at = ?2 WHERE id = ?1",
                rusqlite::params![id, at],
            )?;
            Ok(())
        })
    }

    /// Soft-disable an account: status goes to disconnected and the auth
    /// blob is cleared. GOG additionally drops owned games, since its
    /// library cannot be re-read without a live token; Steam/Epic keep
    /// theirs for reconnect.
    pub fn disconnect_account(&self, id: &str) -> Result<(), DbError> {
        let account = self
            .get_account(id)?
            .ok_or_else(|| DbError::NotFound(format!("account {id}")))?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE accounts SET status = 'disconnected', auth_blob = NULL WHERE id = ?1",
                [id],
            )?;
            if account.platform == Platform::Gog {
                tx.execute(
                    "DELETE FROM play_sessions WHERE game_id IN
                         (SELECT id FROM games WHERE account_id = ?1)",
                    [id],
                )?;
                tx.execute("DELETE FROM games WHERE account_id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let platform_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        platform: Platform::parse(&platform_str).unwrap_or(Platform::PlayHub),
        display_name: row.get(2)?,
        auth_blob: row.get(3)?,
        status: ConnectionStatus::parse(&status_str),
        last_synced_at: row.get(5)?,
    })
}
