//! Typed identifiers for platforms, games, and friends.
//!
//! The store keys games by a platform-prefixed string (`steam_440`,
//! `custom_<uuid>`). [`GameId`] carries the same information as a tagged
//! union so callers dispatch on a match instead of parsing prefixes.

use std::fmt;

/// A remote platform (or the local PlayHub pseudo-platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Steam,
    Epic,
    Gog,
    /// Local-only entries: manually added games, local friends.
    PlayHub,
}

impl Platform {
    pub const ALL: &[Platform] = &[
        Platform::Steam,
        Platform::Epic,
        Platform::Gog,
        Platform::PlayHub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Steam => "steam",
            Platform::Epic => "epic",
            Platform::Gog => "gog",
            Platform::PlayHub => "playhub",
        }
    }

    pub fn parse(s: &str) -> Option<Platform> {
        match s {
            "steam" => Some(Platform::Steam),
            "epic" => Some(Platform::Epic),
            "gog" => Some(Platform::Gog),
            "playhub" | "local" => Some(Platform::PlayHub),
            _ => None,
        }
    }

    /// Whether cumulative playtime for this platform comes from the
    /// provider's own totals (corrected on each sync) or from local
    /// session timing.
    pub fn playtime_from_provider(&self) -> bool {
        matches!(self, Platform::Steam)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical game identity: either a platform-native game or a manually
/// added custom entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GameId {
    Native { platform: Platform, native_id: String },
    Custom(String),
}

impl GameId {
    pub fn native(platform: Platform, native_id: impl Into<String>) -> Self {
        GameId::Native {
            platform,
            native_id: native_id.into(),
        }
    }

    /// Mint a fresh id for a manually added game.
    pub fn new_custom() -> Self {
        GameId::Custom(uuid::Uuid::new_v4().to_string())
    }

    /// The opaque store key. Stable across syncs for the same remote game.
    pub fn store_id(&self) -> String {
        match self {
            GameId::Native {
                platform,
                native_id,
            } => format!("{}_{native_id}", platform.as_str()),
            GameId::Custom(uuid) => format!("custom_{uuid}"),
        }
    }

    /// Parse a store key back into its tagged form.
    pub fn parse(id: &str) -> Option<GameId> {
        let (prefix, rest) = id.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        if prefix == "custom" {
            return Some(GameId::Custom(rest.to_string()));
        }
        Platform::parse(prefix).map(|platform| GameId::Native {
            platform,
            native_id: rest.to_string(),
        })
    }

    pub fn platform(&self) -> Platform {
        match self {
            GameId::Native { platform, .. } => *platform,
            GameId::Custom(_) => Platform::PlayHub,
        }
    }
}

/// Store key for a platform-scoped friend.
pub fn friend_id(platform: Platform, external_id: &str) -> String {
    format!("{}_{external_id}", platform.as_str())
}

/// Lowercase, strip non-alphanumerics. Used as the dedup/search key.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_round_trip() {
        let id = GameId::native(Platform::Steam, "440");
        assert_eq!(id.store_id(), "steam_440");
        assert_eq!(GameId::parse("steam_440"), Some(id));

        let custom = GameId::new_custom();
        let parsed = GameId::parse(&custom.store_id()).unwrap();
        assert_eq!(parsed, custom);
        assert_eq!(parsed.platform(), Platform::PlayHub);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(GameId::parse("steam"), None);
        assert_eq!(GameId::parse("steam_"), None);
        assert_eq!(GameId::parse("origin_123"), None);
    }

    #[test]
    fn test_native_id_keeps_underscores() {
        let id = GameId::parse("epic_fn_main_123").unwrap();
        assert_eq!(
            id,
            GameId::native(Platform::Epic, "fn_main_123")
        );
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("The Witcher 3: Wild Hunt"), "thewitcher3wildhunt");
        assert_eq!(normalize_title("DOOM (2016)"), "doom2016");
    }

    #[test]
    fn test_normalize_title_strips_trademark_symbols() {
        // "DOOM™" and "DOOM" must share one key; Unicode letters survive.
        assert_eq!(normalize_title("DOOM\u{2122}"), normalize_title("DOOM"));
        assert_eq!(normalize_title("Spelunky\u{00ae} – HD"), "spelunkyhd");
        assert_eq!(normalize_title("Pokémon Arena"), "pokémonarena");
    }

    #[test]
    fn test_playtime_authority() {
        assert!(Platform::Steam.playtime_from_provider());
        assert!(!Platform::Epic.playtime_from_provider());
        assert!(!Platform::PlayHub.playtime_from_provider());
    }
}
