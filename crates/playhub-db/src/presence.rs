//! Presence/intent storage: exactly one row per local user, created lazily
//! on first read.
//!
//! Enum columns are closed sets: any value read from storage outside the
//! set coerces to the default rather than failing the read.

use serde::{Deserialize, Serialize};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Offline,
    Online,
    Away,
    DoNotDisturb,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Offline => "offline",
            PresenceState::Online => "online",
            PresenceState::Away => "away",
            PresenceState::DoNotDisturb => "do_not_disturb",
        }
    }

    pub fn parse_or_default(s: &str) -> PresenceState {
        match s {
            "offline" => PresenceState::Offline,
            "online" => PresenceState::Online,
            "away" => PresenceState::Away,
            "do_not_disturb" => PresenceState::DoNotDisturb,
            _ => PresenceState::Online,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    OpenForCoop,
    LookingForParty,
    StoryMode,
    Competitive,
    TestingMods,
    Idle,
    Custom,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::OpenForCoop => "open_for_coop",
            IntentState::LookingForParty => "looking_for_party",
            IntentState::StoryMode => "story_mode",
            IntentState::Competitive => "competitive",
            IntentState::TestingMods => "testing_mods",
            IntentState::Idle => "idle",
            IntentState::Custom => "custom",
        }
    }

    pub fn parse_or_default(s: &str) -> IntentState {
        match s {
            "open_for_coop" => IntentState::OpenForCoop,
            "looking_for_party" => IntentState::LookingForParty,
            "story_mode" => IntentState::StoryMode,
            "competitive" => IntentState::Competitive,
            "testing_mods" => IntentState::TestingMods,
            "custom" => IntentState::Custom,
            _ => IntentState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    Public,
    Friends,
    Favorites,
    Hidden,
}

impl VisibilityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityScope::Public => "public",
            VisibilityScope::Friends => "friends",
            VisibilityScope::Favorites => "favorites",
            VisibilityScope::Hidden => "hidden",
        }
    }

    pub fn parse_or_default(s: &str) -> VisibilityScope {
        match s {
            "public" => VisibilityScope::Public,
            "friends" => VisibilityScope::Friends,
            "favorites" => VisibilityScope::Favorites,
            "hidden" => VisibilityScope::Hidden,
            _ => VisibilityScope::Friends,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteSource {
    Manual,
    Auto,
}

impl WriteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteSource::Manual => "manual",
            WriteSource::Auto => "auto",
        }
    }

    pub fn parse_or_default(s: &str) -> WriteSource {
        match s {
            "manual" => WriteSource::Manual,
            _ => WriteSource::Auto,
        }
    }
}

/// Structured optional metadata carried alongside the intent state.
/// `None` fields are omitted from the stored JSON, which is what makes the
/// arbiter's shallow merge work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_game_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub joinable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instability_warning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub custom_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_session_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub voice_chat_allowed: Option<bool>,
}

impl IntentMetadata {
    /// Shallow merge: present fields of `incoming` overwrite, absent fields
    /// keep their current value. Never a wholesale replace.
    pub fn merge_from(&mut self, incoming: &IntentMetadata) {
        if incoming.current_game_id.is_some() {
            self.current_game_id = incoming.current_game_id.clone();
        }
        if incoming.joinable.is_some() {
            self.joinable = incoming.joinable;
        }
        if incoming.instability_warning.is_some() {
            self.instability_warning = incoming.instability_warning;
        }
        if incoming.custom_label.is_some() {
            self.custom_label = incoming.custom_label.clone();
        }
        if incoming.estimated_session_length.is_some() {
            self.estimated_session_length = incoming.estimated_session_length;
        }
        if incoming.voice_chat_allowed.is_some() {
            self.voice_chat_allowed = incoming.voice_chat_allowed;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub presence_state: PresenceState,
    pub intent_state: IntentState,
    pub intent_metadata: IntentMetadata,
    pub visibility: VisibilityScope,
    pub expires_at: Option<String>,
    pub source: WriteSource,
    pub updated_at: String,
}

impl PresenceRecord {
    fn default_for(user_id: &str) -> PresenceRecord {
        PresenceRecord {
            user_id: user_id.to_string(),
            presence_state: PresenceState::Online,
            intent_state: IntentState::Idle,
            intent_metadata: IntentMetadata::default(),
            visibility: VisibilityScope::Friends,
            expires_at: None,
            source: WriteSource::Auto,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Database {
    /// Read the user's presence row, creating the default lazily.
    pub fn get_or_init_presence(&self, user_id: &str) -> Result<PresenceRecord, DbError> {
        if let Some(record) = self.get_presence(user_id)? {
            return Ok(record);
        }
        let record = PresenceRecord::default_for(user_id);
        self.save_presence(&record)?;
        Ok(record)
    }

    pub fn get_presence(&self, user_id: &str) -> Result<Option<PresenceRecord>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, presence_state, intent_state, intent_metadata,
                        visibility, expires_at, source, updated_at
                 FROM presence_status WHERE user_id = ?1",
            )?;
            let record = stmt.query_row([user_id], row_to_presence).optional()?;
            Ok(record)
        })
    }

    pub fn save_presence(&self, record: &PresenceRecord) -> Result<(), DbError> {
        let metadata = serde_json::to_string(&record.intent_metadata)
            .map_err(|e| DbError::InvalidData(format!("intent metadata: {e}")))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence_status
                     (user_id, presence_state, intent_state, intent_metadata,
                      visibility, expires_at, source, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id) DO UPDATE SET
                     presence_state = ?2,
                     intent_state = ?3,
                     intent_metadata = ?4,
                     visibility = ?5,
                     expires_at = ?6,
                     source = ?7,
                     updated_at = ?8",
                rusqlite::params![
                    record.user_id,
                    record.presence_state.as_str(),
                    record.intent_state.as_str(),
                    metadata,
                    record.visibility.as_str(),
                    record.expires_at,
                    record.source.as_str(),
                    record.updated_at,
                ],
            )?;
            Ok(())
        })
    }
}

fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRecord> {
    let presence: String = row.get(1)?;
    let intent: String = row.get(2)?;
    let metadata_json: String = row.get(3)?;
    let visibility: String = row.get(4)?;
    let source: String = row.get(6)?;
    Ok(PresenceRecord {
        user_id: row.get(0)?,
        presence_state: PresenceState::parse_or_default(&presence),
        intent_state: IntentState::parse_or_default(&intent),
        intent_metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        visibility: VisibilityScope::parse_or_default(&visibility),
        expires_at: row.get(5)?,
        source: WriteSource::parse_or_default(&source),
        updated_at: row.get(7)?,
    })
}
