//! Steam provider client.
//!
//! Auth model: a Web API key plus the user's 64-bit Steam id — no token
//! flow, nothing expires. Library and profile come from the Web API as
//! JSON; the friends list has no usable API surface for non-public keys,
//! so it is scraped from the community profile page. The scrape is
//! brittle by nature: every field falls back to "unknown"/empty, a
//! malformed block is skipped, and the parser never errors.

use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::request::HttpClient;
use crate::{
    Credential, Provider, ProviderError, ProviderProfile, RemoteFriend, RemoteGame,
};

const API_BASE: &str = "https://api.steampowered.com";
const COMMUNITY_BASE: &str = "https://steamcommunity.com";

pub struct SteamClient {
    http: HttpClient,
}

impl SteamClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl Default for SteamClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct PlayerSummariesEnvelope {
    response: PlayerSummaries,
}

#[derive(Debug, Deserialize, Default)]
struct PlayerSummaries {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummary {
    steamid: String,
    #[serde(default)]
    personaname: String,
}

#[derive(Debug, Deserialize)]
struct OwnedGamesEnvelope {
    response: OwnedGames,
}

#[derive(Debug, Deserialize, Default)]
struct OwnedGames {
    #[serde(default)]
    games: Vec<OwnedGame>,
}

/// One record of GetOwnedGames. Everything except the appid is optional
/// in practice; a record without an appid is dropped, not fatal.
#[derive(Debug, Deserialize)]
struct OwnedGame {
    appid: Option<i64>,
    name: Option<String>,
    /// Minutes, cumulative.
    playtime_forever: Option<i64>,
    img_icon_url: Option<String>,
    /// Unix seconds of the last launch, when Steam reports it.
    rtime_last_played: Option<i64>,
}

impl Provider for SteamClient {
    fn platform_name(&self) -> &'static str {
        "steam"
    }

    async fn fetch_profile(&self, cred: &Credential) -> Result<ProviderProfile, ProviderError> {
        let url = format!(
            "{API_BASE}/ISteamUser/GetPlayerSummaries/v2/?key={}&steamids={}",
            cred.access_token, cred.user_id
        );
        let body = self.http.get_with_retry(&url, HeaderMap::new()).await?;
        let envelope: PlayerSummariesEnvelope = serde_json::from_str(&body)?;

        envelope
            .response
            .players
            .into_iter()
            .next()
            .map(|p| ProviderProfile {
                user_id: p.steamid,
                display_name: p.personaname,
            })
            .ok_or_else(|| {
                ProviderError::ProfileFetchFailed(format!("no summary for {}", cred.user_id))
            })
    }

    async fn fetch_library(&self, cred: &Credential) -> Result<Vec<RemoteGame>, ProviderError> {
        let url = format!(
            "{API_BASE}/IPlayerService/GetOwnedGames/v1/?key={}&steamid={}&include_appinfo=1&include_played_free_games=1",
            cred.access_token, cred.user_id
        );
        let body = self.http.get_with_retry(&url, HeaderMap::new()).await?;
        let envelope: OwnedGamesEnvelope = serde_json::from_str(&body)?;

        let games = envelope
            .response
            .games
            .into_iter()
            .filter_map(normalize_owned_game)
            .collect();
        Ok(games)
    }

    async fn fetch_friends(&self, cred: &Credential) -> Result<Vec<RemoteFriend>, ProviderError> {
        let url = format!("{COMMUNITY_BASE}/profiles/{}/friends", cred.user_id);
        let body = self.http.get_with_retry(&url, HeaderMap::new()).await?;
        Ok(parse_friends_html(&body))
    }

    /// Steam keys cannot be refreshed: an auth failure means the user has
    /// to supply a new key interactively.
    async fn refresh(&self, _cred: &Credential) -> Result<Credential, ProviderError> {
        Err(ProviderError::AuthRequired)
    }
}

fn normalize_owned_game(game: OwnedGame) -> Option<RemoteGame> {
    let appid = game.appid?;
    let title = match game.name {
        Some(name) if !name.is_empty() => name,
        _ => format!("App {appid}"),
    };
    let cover_url = Some(format!(
        "https://cdn.cloudflare.steamstatic.com/steam/apps/{appid}/header.jpg"
    ));
    let background_url = game.img_icon_url.filter(|h| !h.is_empty()).map(|hash| {
        format!("https://media.steampowered.com/steamcommunity/public/images/apps/{appid}/{hash}.jpg")
    });
    let last_played_at = game
        .rtime_last_played
        .filter(|ts| *ts > 0)
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339());

    Some(RemoteGame {
        native_id: appid.to_string(),
        title,
        playtime_seconds: game.playtime_forever.map(|m| m * 60),
        cover_url,
        background_url,
        last_played_at,
        metadata_json: None,
    })
}

/// Scrape friend blocks out of the community friends page.
///
/// Anchors on `data-steamid=` attributes; persona name, avatar, and status
/// are pulled from the surrounding block when present and default to
/// "unknown"/empty when the markup shifted.
fn parse_friends_html(html: &str) -> Vec<RemoteFriend> {
    let mut friends = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = html[cursor..].find("data-steamid=\"") {
        let anchor = cursor + offset;
        let id_start = anchor + "data-steamid=\"".len();
        let Some(id_len) = html[id_start..].find('"') else {
            break;
        };
        let external_id = html[id_start..id_start + id_len].to_string();

        // The persona status lives in the class attribute of the tag the
        // steamid hangs off; the rest of the fields follow it.
        let tag_start = html[..anchor].rfind('<').unwrap_or(anchor);
        let tag = &html[tag_start..anchor];

        let block_start = id_start + id_len;
        let block_end = html[block_start..]
            .find("data-steamid=\"")
            .map(|next| block_start + next)
            .unwrap_or(html.len());
        let block = &html[block_start..block_end];
        cursor = block_end;

        if external_id.is_empty() {
            continue;
        }

        let display_name = extract_between(block, "friend_block_content\">", "<br")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let avatar_url = extract_between(block, "<img src=\"", "\"")
            .unwrap_or_default();
        let class = extract_between(tag, "class=\"", "\"").unwrap_or_default();
        let presence = if class.contains("in-game") {
            "in-game"
        } else if class.contains("offline") {
            "offline"
        } else if class.contains("online") {
            "online"
        } else {
            "offline"
        };
        let activity = extract_between(block, "friend_last_online_text\">", "<")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        friends.push(RemoteFriend {
            external_id,
            display_name,
            avatar_url,
            presence: presence.to_string(),
            activity,
        });
    }

    friends
}

fn extract_between(haystack: &str, open: &str, close: &str) -> Option<String> {
    let start = haystack.find(open)? + open.len();
    let len = haystack[start..].find(close)?;
    Some(haystack[start..start + len].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_owned_game_full_record() {
        let game = OwnedGame {
            appid: Some(440),
            name: Some("Team Fortress 2".into()),
            playtime_forever: Some(90),
            img_icon_url: Some("abc123".into()),
            rtime_last_played: Some(1_700_000_000),
        };
        let normalized = normalize_owned_game(game).unwrap();
        assert_eq!(normalized.native_id, "440");
        assert_eq!(normalized.title, "Team Fortress 2");
        assert_eq!(normalized.playtime_seconds, Some(5400));
        assert!(normalized.cover_url.unwrap().contains("/440/"));
        assert!(normalized.last_played_at.unwrap().starts_with("2023-11-14"));
    }

    #[test]
    fn test_normalize_owned_game_partial_record() {
        let game = OwnedGame {
            appid: Some(10),
            name: None,
            playtime_forever: None,
            img_icon_url: None,
            rtime_last_played: Some(0),
        };
        let normalized = normalize_owned_game(game).unwrap();
        assert_eq!(normalized.title, "App 10");
        assert_eq!(normalized.playtime_seconds, None);
        assert!(normalized.background_url.is_none());
        assert!(normalized.last_played_at.is_none());
    }

    #[test]
    fn test_normalize_owned_game_without_appid_is_dropped() {
        let game = OwnedGame {
            appid: None,
            name: Some("ghost".into()),
            playtime_forever: None,
            img_icon_url: None,
            rtime_last_played: None,
        };
        assert!(normalize_owned_game(game).is_none());
    }

    const FRIENDS_HTML: &str = r#"
        <div class="friend_block_v2 persona in-game" data-steamid="765611980001">
            <img src="https://avatars.example/a1.jpg">
            <div class="friend_block_content">Alice<br>
                <span class="friend_last_online_text">In-Game Foo</span>
            </div>
        </div>
        <div class="friend_block_v2 persona offline" data-steamid="765611980002">
            <div class="friend_block_content"><br></div>
        </div>
    "#;

    #[test]
    fn test_parse_friends_html() {
        let friends = parse_friends_html(FRIENDS_HTML);
        assert_eq!(friends.len(), 2);

        assert_eq!(friends[0].external_id, "765611980001");
        assert_eq!(friends[0].display_name, "Alice");
        assert_eq!(friends[0].avatar_url, "https://avatars.example/a1.jpg");
        assert_eq!(friends[0].presence, "in-game");
        assert_eq!(friends[0].activity, "In-Game Foo");

        // Second block is missing nearly everything: defaults, not errors.
        assert_eq!(friends[1].external_id, "765611980002");
        assert_eq!(friends[1].display_name, "unknown");
        assert_eq!(friends[1].avatar_url, "");
        assert_eq!(friends[1].presence, "offline");
    }

    #[test]
    fn test_parse_friends_html_garbage() {
        assert!(parse_friends_html("").is_empty());
        assert!(parse_friends_html("<html><body>not a friends page</body></html>").is_empty());
        // Unterminated attribute must not panic or loop.
        assert!(parse_friends_html("data-steamid=\"76561").is_empty());
    }
}
