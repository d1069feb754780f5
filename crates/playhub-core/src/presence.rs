//! Presence arbiter: one authoritative presence/intent record per user
//! under concurrent automatic and manual writers.
//!
//! Precedence is the whole point: a manual record rejects auto writes, so
//! the session tracker's "now playing" inference can never clobber an
//! explicit user choice. Derived metadata comes from a declarative rule
//! table, recomputed on every accepted write.

use chrono::Utc;

use playhub_db::DbError;
use playhub_db::presence::{
    IntentMetadata, IntentState, PresenceRecord, PresenceState, VisibilityScope, WriteSource,
};

use crate::broadcast::PresenceBroadcaster;
use crate::events::EngineEvent;
use crate::state::SharedState;

/// Metadata overrides forced by an intent state. One-way derivations, not
/// stored user choices.
struct IntentRule {
    intent: IntentState,
    joinable: Option<bool>,
    instability_warning: Option<bool>,
}

const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        intent: IntentState::StoryMode,
        joinable: Some(false),
        instability_warning: None,
    },
    IntentRule {
        intent: IntentState::OpenForCoop,
        joinable: Some(true),
        instability_warning: None,
    },
    IntentRule {
        intent: IntentState::TestingMods,
        joinable: None,
        instability_warning: Some(true),
    },
];

/// One incoming presence write. `None` fields leave the stored value
/// untouched; metadata is shallow-merged.
#[derive(Debug, Clone, Default)]
pub struct PresenceWrite {
    pub presence_state: Option<PresenceState>,
    pub intent_state: Option<IntentState>,
    pub intent_metadata: Option<IntentMetadata>,
    pub visibility: Option<VisibilityScope>,
    /// Outer `None` leaves the stored expiry alone; `Some(None)` clears it.
    pub expires_at: Option<Option<String>>,
}

pub struct PresenceArbiter {
    state: SharedState,
    broadcaster: PresenceBroadcaster,
    user_id: String,
}

impl PresenceArbiter {
    pub fn new(state: SharedState, broadcaster: PresenceBroadcaster, user_id: String) -> Self {
        Self {
            state,
            broadcaster,
            user_id,
        }
    }

    /// Current record, lazily initialized to the default.
    pub fn get(&self) -> Result<PresenceRecord, DbError> {
        self.state.db().get_or_init_presence(&self.user_id)
    }

    /// Apply a write under the precedence rule. Returns the record now in
    /// the store — unchanged when an auto write lost to a manual record.
    pub fn write(
        &self,
        write: PresenceWrite,
        source: WriteSource,
    ) -> Result<PresenceRecord, DbError> {
        let existing = self.get()?;

        if existing.source == WriteSource::Manual && source == WriteSource::Auto {
            tracing::debug!("Auto presence write rejected: record is manually held");
            return Ok(existing);
        }

        let mut record = existing;
        if let Some(presence) = write.presence_state {
            record.presence_state = presence;
        }
        if let Some(intent) = write.intent_state {
            record.intent_state = intent;
        }
        if let Some(metadata) = &write.intent_metadata {
            record.intent_metadata.merge_from(metadata);
        }
        if let Some(visibility) = write.visibility {
            record.visibility = visibility;
        }
        if let Some(expiry) = write.expires_at {
            record.expires_at = expiry;
        }
        record.source = source;
        record.updated_at = Utc::now().to_rfc3339();

        apply_intent_rules(&mut record);

        self.state.db().save_presence(&record)?;
        self.state.emit(EngineEvent::PresenceChanged {
            record: record.clone(),
        });
        self.broadcaster.on_presence(&record);
        Ok(record)
    }

    /// Session start: auto-infer "open for co-op on this game". Subject to
    /// the precedence rule like any other auto write.
    pub fn on_session_start(&self, game_id: &str) -> Result<PresenceRecord, DbError> {
        self.write(
            PresenceWrite {
                intent_state: Some(IntentState::OpenForCoop),
                intent_metadata: Some(IntentMetadata {
                    current_game_id: Some(game_id.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            WriteSource::Auto,
        )
    }

    /// Session end: reset to idle, but only if the ending game is still
    /// the one the record points at.
    pub fn on_session_end(&self, game_id: &str) -> Result<PresenceRecord, DbError> {
        let existing = self.get()?;
        if existing.intent_metadata.current_game_id.as_deref() != Some(game_id) {
            return Ok(existing);
        }

        let mut record = existing;
        if record.source == WriteSource::Manual {
            // Manual record wins; the auto reset is a no-op.
            return Ok(record);
        }
        record.intent_state = IntentState::Idle;
        record.intent_metadata.current_game_id = None;
        record.source = WriteSource::Auto;
        record.updated_at = Utc::now().to_rfc3339();
        apply_intent_rules(&mut record);

        self.state.db().save_presence(&record)?;
        self.state.emit(EngineEvent::PresenceChanged {
            record: record.clone(),
        });
        self.broadcaster.on_presence(&record);
        Ok(record)
    }
}

fn apply_intent_rules(record: &mut PresenceRecord) {
    for rule in INTENT_RULES {
        if rule.intent != record.intent_state {
            continue;
        }
        if rule.joinable.is_some() {
            record.intent_metadata.joinable = rule.joinable;
        }
        if rule.instability_warning.is_some() {
            record.intent_metadata.instability_warning = rule.instability_warning;
        }
    }
}
