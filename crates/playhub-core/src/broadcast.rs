//! Presence broadcaster: pushes the current presence record to external
//! rich-presence sinks.
//!
//! Strictly cosmetic. Every sink failure is logged and swallowed; nothing
//! here may affect session or sync correctness. Publishing runs on a
//! dedicated task fed by an unbounded channel so callers never block on a
//! slow sink.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use playhub_db::Database;
use playhub_db::presence::{IntentState, PresenceRecord, PresenceState, VisibilityScope};

/// What an external sink receives for one presence update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPayload {
    pub game_id: Option<String>,
    pub game_title: Option<String>,
    pub session_started_at: Option<String>,
    pub state_label: String,
}

/// An external rich-presence channel. Implementations must not panic;
/// errors are reported back and swallowed by the broadcast task.
pub trait PresenceSink: Send + 'static {
    fn name(&self) -> &'static str;
    fn publish(&mut self, payload: &BroadcastPayload) -> anyhow::Result<()>;
    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Human-readable label for an intent state. `custom` passes the user's
/// label through; everything unlabeled falls back to the app name.
pub fn state_label(intent: IntentState, custom_label: Option<&str>) -> String {
    match intent {
        IntentState::OpenForCoop => "Open for co-op".to_string(),
        IntentState::LookingForParty => "Looking for party".to_string(),
        IntentState::StoryMode => "Playing solo".to_string(),
        IntentState::Competitive => "In competitive".to_string(),
        IntentState::TestingMods => "Testing mods".to_string(),
        IntentState::Custom => match custom_label {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => "Using PlayHub".to_string(),
        },
        IntentState::Idle => "Using PlayHub".to_string(),
    }
}

enum BroadcastCommand {
    Publish(BroadcastPayload),
    Clear,
    SetEnabled(bool),
}

/// Cheap handle for the broadcast task. Dropping all handles (plus
/// cancellation) stops the task after a final clear.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    tx: mpsc::UnboundedSender<BroadcastCommand>,
    db: Database,
}

impl PresenceBroadcaster {
    pub fn spawn(
        db: Database,
        sinks: Vec<Box<dyn PresenceSink>>,
        enabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(broadcast_task(rx, sinks, enabled, cancel));
        Self { tx, db }
    }

    /// Translate an arbiter transition into a publish or a clear.
    pub fn on_presence(&self, record: &PresenceRecord) {
        if record.presence_state == PresenceState::Offline
            || record.visibility == VisibilityScope::Hidden
        {
            let _ = self.tx.send(BroadcastCommand::Clear);
            return;
        }

        let game_id = record.intent_metadata.current_game_id.clone();
        let (game_title, session_started_at) = match game_id.as_deref() {
            Some(id) => (
                self.db.get_game(id).ok().flatten().map(|g| g.title),
                self.db
                    .get_open_session(id)
                    .ok()
                    .flatten()
                    .map(|s| s.started_at),
            ),
            None => (None, None),
        };

        let payload = BroadcastPayload {
            game_id,
            game_title,
            session_started_at,
            state_label: state_label(
                record.intent_state,
                record.intent_metadata.custom_label.as_deref(),
            ),
        };
        let _ = self.tx.send(BroadcastCommand::Publish(payload));
    }

    /// Global switch. Disabling clears any active broadcast.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.tx.send(BroadcastCommand::SetEnabled(enabled));
    }

    pub fn clear(&self) {
        let _ = self.tx.send(BroadcastCommand::Clear);
    }
}

async fn broadcast_task(
    mut rx: mpsc::UnboundedReceiver<BroadcastCommand>,
    mut sinks: Vec<Box<dyn PresenceSink>>,
    mut enabled: bool,
    cancel: CancellationToken,
) {
    let mut active = false;
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            BroadcastCommand::Publish(payload) => {
                if !enabled {
                    continue;
                }
                for sink in &mut sinks {
                    if let Err(e) = sink.publish(&payload) {
                        tracing::warn!("Presence sink '{}' publish failed: {e}", sink.name());
                    }
                }
                active = true;
            }
            BroadcastCommand::Clear => {
                if active {
                    clear_sinks(&mut sinks);
                    active = false;
                }
            }
            BroadcastCommand::SetEnabled(value) => {
                if !value && active {
                    clear_sinks(&mut sinks);
                    active = false;
                }
                enabled = value;
            }
        }
    }

    if active {
        clear_sinks(&mut sinks);
    }
}

fn clear_sinks(sinks: &mut [Box<dyn PresenceSink>]) {
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.clear() {
            tracing::warn!("Presence sink '{}' clear failed: {e}", sink.name());
        }
    }
}

/// Logs transitions at debug level. The stand-in sink until a real
/// rich-presence integration is wired up.
pub struct LogSink;

impl PresenceSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(&mut self, payload: &BroadcastPayload) -> anyhow::Result<()> {
        tracing::debug!(
            "Presence broadcast: {} (game: {:?})",
            payload.state_label,
            payload.game_title
        );
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        tracing::debug!("Presence broadcast cleared");
        Ok(())
    }
}
