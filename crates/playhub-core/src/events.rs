//! Engine events broadcast to observers (UI bridge, logs).
//!
//! The transport is the caller's concern; the engine only pushes typed
//! payloads into a broadcast channel.

use serde::Serialize;

use playhub_db::presence::PresenceRecord;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Coarse progress of one sync run.
    SyncProgress {
        platform: String,
        message: String,
        percent: u8,
    },
    SyncCompleted {
        platform: String,
        success: bool,
        items_synced: i64,
    },
    SessionStarted {
        game_id: String,
    },
    SessionEnded {
        game_id: String,
        duration_seconds: i64,
    },
    PresenceChanged {
        record: PresenceRecord,
    },
    /// Toast-style message for the user.
    Notification {
        message: String,
    },
}
