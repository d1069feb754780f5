//! GOG provider client.
//!
//! OAuth code flow against auth.gog.com plus the embed API for user data,
//! library, and friends. GOG is the one platform with a silent-refresh
//! contract: on an auth failure the client re-authenticates without UI,
//! and if the refreshed identity is not the account we expected, the
//! refresh fails closed instead of silently swapping identities.

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::request::HttpClient;
use crate::{
    Credential, Provider, ProviderError, ProviderProfile, RemoteFriend, RemoteGame,
};

const AUTHORIZE_URL: &str = "https://auth.gog.com/auth";
const TOKEN_URL: &str = "https://auth.gog.com/token";
const EMBED_BASE: &str = "https://embed.gog.com";

pub struct GogClient {
    http: HttpClient,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize, Default)]
struct FilteredProducts {
    #[serde(default)]
    products: Vec<GogProduct>,
}

#[derive(Debug, Deserialize)]
struct GogProduct {
    id: Option<i64>,
    title: Option<String>,
    image: Option<String>,
    #[serde(rename = "category")]
    category: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FriendsEnvelope {
    #[serde(default)]
    items: Vec<GogFriend>,
}

#[derive(Debug, Deserialize)]
struct GogFriend {
    #[serde(rename = "user")]
    user: Option<GogFriendUser>,
}

#[derive(Debug, Deserialize)]
struct GogFriendUser {
    id: Option<String>,
    username: Option<String>,
    avatar: Option<String>,
    #[serde(rename = "presence")]
    presence: Option<String>,
}

impl GogClient {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            http: HttpClient::new(),
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }
        let mut url = Url::parse(AUTHORIZE_URL)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("layout", "client2")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<Credential, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let (status, body) = self.http.post_form(TOKEN_URL, &params).await?;
        parse_token_response(status, &body)
    }

    fn bearer_headers(&self, cred: &Credential) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", cred.access_token)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }
}

impl Provider for GogClient {
    fn platform_name(&self) -> &'static str {
        "gog"
    }

    async fn fetch_profile(&self, cred: &Credential) -> Result<ProviderProfile, ProviderError> {
        let url = format!("{EMBED_BASE}/userData.json");
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let data: UserData = serde_json::from_str(&body)
            .map_err(|e| ProviderError::ProfileFetchFailed(e.to_string()))?;
        Ok(ProviderProfile {
            user_id: data.user_id,
            display_name: data.username,
        })
    }

    async fn fetch_library(&self, cred: &Credential) -> Result<Vec<RemoteGame>, ProviderError> {
        let url = format!("{EMBED_BASE}/account/getFilteredProducts?mediaType=1");
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let envelope: FilteredProducts = serde_json::from_str(&body)?;
        Ok(envelope
            .products
            .into_iter()
            .filter_map(normalize_product)
            .collect())
    }

    async fn fetch_friends(&self, cred: &Credential) -> Result<Vec<RemoteFriend>, ProviderError> {
        let url = format!("{EMBED_BASE}/users/{}/friends", cred.user_id);
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let envelope: FriendsEnvelope = serde_json::from_str(&body)?;
        Ok(envelope
            .items
            .into_iter()
            .filter_map(|f| {
                let user = f.user?;
                let external_id = user.id.filter(|id| !id.is_empty())?;
                Some(RemoteFriend {
                    external_id,
                    display_name: user
                        .username
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "unknown".to_string()),
                    avatar_url: user.avatar.unwrap_or_default(),
                    presence: user.presence.unwrap_or_default(),
                    activity: String::new(),
                })
            })
            .collect())
    }

    /// Silent re-authentication. Fails closed on identity mismatch: the
    /// refreshed token must belong to the same GOG user id that the
    /// account row was created for.
    async fn refresh(&self, cred: &Credential) -> Result<Credential, ProviderError> {
        if cred.refresh_token.is_empty() {
            return Err(ProviderError::AuthRequired);
        }
        tracing::info!("Refreshing GOG OAuth token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", cred.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let (status, body) = self.http.post_form(TOKEN_URL, &params).await?;
        let refreshed = parse_token_response(status, &body)?;

        verify_identity(cred, refreshed)
    }
}

fn verify_identity(
    expected: &Credential,
    mut refreshed: Credential,
) -> Result<Credential, ProviderError> {
    if refreshed.user_id.is_empty() {
        // Token endpoint did not echo the user id; keep the known one.
        refreshed.user_id = expected.user_id.clone();
        return Ok(refreshed);
    }
    if refreshed.user_id != expected.user_id {
        return Err(ProviderError::IdentityMismatch {
            expected: expected.user_id.clone(),
            got: refreshed.user_id,
        });
    }
    Ok(refreshed)
}

fn parse_token_response(status: u16, body: &str) -> Result<Credential, ProviderError> {
    if !(200..300).contains(&status) {
        return Err(ProviderError::TokenRefreshFailed(format!(
            "status {status}: {body}"
        )));
    }
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ExchangeFailed(format!("failed to parse response: {e}")))?;
    Ok(Credential {
        access_token: token.access_token,
        refresh_token: token.refresh_token.unwrap_or_default(),
        expires_at: Utc::now().timestamp() + token.expires_in,
        user_id: token.user_id.unwrap_or_default(),
    })
}

fn normalize_product(product: GogProduct) -> Option<RemoteGame> {
    let id = product.id?;
    let title = product
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Product {id}"));
    // Image URLs come host-relative with a size placeholder.
    let cover_url = product
        .image
        .filter(|i| !i.is_empty())
        .map(|image| format!("https:{image}_product_card_v2_mobile_slider_639.jpg"));
    let metadata_json = product
        .category
        .filter(|c| !c.is_empty())
        .map(|category| serde_json::json!({ "genres": [category] }).to_string());

    Some(RemoteGame {
        native_id: id.to_string(),
        title,
        cover_url,
        metadata_json,
        ..Default::default()
    })
}
