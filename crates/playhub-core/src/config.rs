//! Runtime engine configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration: provider credentials and timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub steam_api_key: String,
    pub epic_client_id: String,
    pub epic_client_secret: String,
    pub gog_client_id: String,
    pub gog_client_secret: String,
    /// Local OAuth callback for the interactive auth window.
    pub redirect_port: u16,
    /// Auto-sync cadence for connected accounts.
    pub sync_interval_secs: u64,
    /// Session watcher process-poll interval.
    pub poll_interval: Duration,
    /// Session close timeout when the process cannot be identified.
    pub fallback_close: Duration,
    pub broadcast_enabled: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            steam_api_key: String::new(),
            epic_client_id: String::new(),
            epic_client_secret: String::new(),
            gog_client_id: String::new(),
            gog_client_secret: String::new(),
            redirect_port: 8321,
            sync_interval_secs: 60 * 60,
            poll_interval: Duration::from_secs(10),
            fallback_close: Duration::from_secs(60),
            broadcast_enabled: true,
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, `.env` included. Missing keys keep
    /// their defaults; provider features without credentials simply report
    /// as unconfigured at use time.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        let g = |key: &str| std::env::var(key).unwrap_or_default();

        config.steam_api_key = g("PLAYHUB_STEAM_API_KEY");
        config.epic_client_id = g("PLAYHUB_EPIC_CLIENT_ID");
        config.epic_client_secret = g("PLAYHUB_EPIC_CLIENT_SECRET");
        config.gog_client_id = g("PLAYHUB_GOG_CLIENT_ID");
        config.gog_client_secret = g("PLAYHUB_GOG_CLIENT_SECRET");

        if let Ok(v) = std::env::var("PLAYHUB_REDIRECT_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.redirect_port = port;
            }
        }
        if let Ok(v) = std::env::var("PLAYHUB_SYNC_INTERVAL_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.sync_interval_secs = secs.max(60);
            }
        }
        if let Ok(v) = std::env::var("PLAYHUB_POLL_INTERVAL_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.poll_interval = Duration::from_secs(secs.max(1));
            }
        }
        if let Ok(v) = std::env::var("PLAYHUB_BROADCAST_ENABLED") {
            config.broadcast_enabled = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("PLAYHUB_DATA_DIR") {
            if !v.is_empty() {
                config.data_dir = Some(PathBuf::from(v));
            }
        }

        config
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.redirect_port)
    }

    /// Provider credential keys that are still empty, for the startup
    /// warning and the settings UI.
    pub fn missing_provider_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.steam_api_key.is_empty() {
            missing.push("PLAYHUB_STEAM_API_KEY");
        }
        if self.epic_client_id.is_empty() || self.epic_client_secret.is_empty() {
            missing.push("PLAYHUB_EPIC_CLIENT_ID/SECRET");
        }
        if self.gog_client_id.is_empty() || self.gog_client_secret.is_empty() {
            missing.push("PLAYHUB_GOG_CLIENT_ID/SECRET");
        }
        missing
    }

    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playhub")
    }
}
