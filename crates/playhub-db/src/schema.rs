//! Database schema definitions and migrations.

use rusqlite::Connection;

use crate::DbError;

pub fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(SCHEMA)?;
    apply_additive_migrations(conn)?;
    Ok(())
}

/// Columns added after the first release. Additive-only: each is probed
/// and created if missing so the migration is idempotent.
fn apply_additive_migrations(conn: &Connection) -> Result<(), DbError> {
    add_column_if_missing(conn, "games", "background_url", "TEXT DEFAULT ''")?;
    add_column_if_missing(conn, "games", "hltb_main_minutes", "INTEGER")?;
    add_column_if_missing(conn, "games", "hltb_completionist_minutes", "INTEGER")?;
    add_column_if_missing(conn, "games", "notes", "TEXT DEFAULT ''")?;
    add_column_if_missing(conn, "friends", "activity", "TEXT DEFAULT ''")?;
    add_column_if_missing(conn, "presence_status", "expires_at", "TEXT")?;
    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), DbError> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    tracing::info!("Adding {column} column to {table}");
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|name| name.as_deref() == Ok(column));
    Ok(exists)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    display_name TEXT NOT NULL DEFAULT '',
    auth_blob TEXT,
    status TEXT NOT NULL DEFAULT 'connected',
    last_synced_at TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    title TEXT NOT NULL,
    normalized_title TEXT NOT NULL,
    install_path TEXT,
    executable_path TEXT,
    installed BOOLEAN NOT NULL DEFAULT false,
    playtime_seconds INTEGER NOT NULL DEFAULT 0,
    last_played_at TEXT,
    cover_url TEXT DEFAULT '',
    background_url TEXT DEFAULT '',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    hltb_main_minutes INTEGER,
    hltb_completionist_minutes INTEGER,
    user_rating INTEGER,
    favorite BOOLEAN NOT NULL DEFAULT false,
    notes TEXT DEFAULT '',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_games_account_id ON games(account_id);
CREATE INDEX IF NOT EXISTS idx_games_normalized_title ON games(normalized_title);

CREATE TABLE IF NOT EXISTS play_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_seconds INTEGER,
    FOREIGN KEY (game_id) REFERENCES games(id)
);

CREATE INDEX IF NOT EXISTS idx_play_sessions_game_id ON play_sessions(game_id);
CREATE INDEX IF NOT EXISTS idx_play_sessions_open
    ON play_sessions(game_id)
    WHERE ended_at IS NULL;

CREATE TABLE IF NOT EXISTS friends (
    id TEXT PRIMARY KEY,
    platform TEXT NOT NULL,
    username TEXT NOT NULL,
    avatar_url TEXT DEFAULT '',
    status TEXT NOT NULL DEFAULT 'offline',
    activity TEXT DEFAULT '',
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_friends_platform ON friends(platform);

CREATE TABLE IF NOT EXISTS presence_status (
    user_id TEXT PRIMARY KEY,
    presence_state TEXT NOT NULL DEFAULT 'online',
    intent_state TEXT NOT NULL DEFAULT 'idle',
    intent_metadata TEXT NOT NULL DEFAULT '{}',
    visibility TEXT NOT NULL DEFAULT 'friends',
    expires_at TEXT,
    source TEXT NOT NULL DEFAULT 'auto',
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sync_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform TEXT NOT NULL,
    sync_type TEXT NOT NULL DEFAULT 'full',
    status TEXT NOT NULL DEFAULT 'in_progress',
    items_synced INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_history_platform
    ON sync_history(platform, started_at DESC);
"#;
