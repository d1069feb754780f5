//! Epic Games provider client.
//!
//! OAuth authorization-code flow against the Epic account service; library
//! comes from the launcher library service, friends from the friends
//! service. The interactive part of the flow (embedded browser window) is
//! the caller's concern — this client builds the URL, exchanges the code,
//! and refreshes tokens.

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::request::HttpClient;
use crate::{
    Credential, Provider, ProviderError, ProviderProfile, RemoteFriend, RemoteGame,
    RemoteInventoryItem,
};

const AUTHORIZE_URL: &str = "https://www.epicgames.com/id/authorize";
const TOKEN_URL: &str = "https://account-api.epicgames.com/account/api/oauth/token";
const ACCOUNT_BASE: &str = "https://account-api.epicgames.com/account/api";
const LIBRARY_BASE: &str = "https://library-service.live.use1a.on.epicgames.com/library/api";
const FRIENDS_BASE: &str = "https://friends-public-service-prod.ol.epicgames.com/friends/api";

pub struct EpicClient {
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
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpicAccount {
    id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize, Default)]
struct LibraryEnvelope {
    #[serde(default)]
    records: Vec<LibraryRecord>,
}

#[derive(Debug, Deserialize)]
struct LibraryRecord {
    #[serde(rename = "catalogItemId")]
    catalog_item_id: Option<String>,
    #[serde(rename = "sandboxName")]
    sandbox_name: Option<String>,
    #[serde(rename = "appName")]
    app_name: Option<String>,
    namespace: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FriendsEnvelope {
    #[serde(default)]
    friends: Vec<FriendRecord>,
}

#[derive(Debug, Deserialize)]
struct FriendRecord {
    #[serde(rename = "accountId")]
    account_id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

impl EpicClient {
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

    /// Authorization URL the interactive window navigates to.
    pub fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }
        let mut url = Url::parse(AUTHORIZE_URL)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", "basic_profile friends_list")
            .append_pair("state", state);
        Ok(url.to_string())
    }

    /// Exchange an authorization code for a credential.
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

impl Provider for EpicClient {
    fn platform_name(&self) -> &'static str {
        "epic"
    }

    async fn fetch_profile(&self, cred: &Credential) -> Result<ProviderProfile, ProviderError> {
        let url = format!("{ACCOUNT_BASE}/public/account/{}", cred.user_id);
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let account: EpicAccount = serde_json::from_str(&body)
            .map_err(|e| ProviderError::ProfileFetchFailed(e.to_string()))?;
        Ok(ProviderProfile {
            user_id: account.id,
            display_name: account.display_name,
        })
    }

    async fn fetch_library(&self, cred: &Credential) -> Result<Vec<RemoteGame>, ProviderError> {
        let url = format!("{LIBRARY_BASE}/public/items?includeMetadata=true");
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let envelope: LibraryEnvelope = serde_json::from_str(&body)?;
        Ok(envelope
            .records
            .into_iter()
            .filter_map(normalize_library_record)
            .collect())
    }

    async fn fetch_friends(&self, cred: &Credential) -> Result<Vec<RemoteFriend>, ProviderError> {
        let url = format!("{FRIENDS_BASE}/v1/{}/summary", cred.user_id);
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let envelope: FriendsEnvelope = serde_json::from_str(&body)?;
        Ok(envelope
            .friends
            .into_iter()
            .filter_map(|f| {
                let external_id = f.account_id?;
                Some(RemoteFriend {
                    display_name: f
                        .display_name
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "unknown".to_string()),
                    external_id,
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn fetch_inventory(
        &self,
        cred: &Credential,
    ) -> Result<Vec<RemoteInventoryItem>, ProviderError> {
        // Entitlements double as the inventory surface on Epic.
        let url = format!("{ACCOUNT_BASE}/public/account/{}/entitlements", cred.user_id);
        let body = self
            .http
            .get_with_retry(&url, self.bearer_headers(cred))
            .await?;
        let items: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|item| {
                let native_id = item.get("id")?.as_str()?.to_string();
                let name = item
                    .get("entitlementName")
                    .and_then(|n| n.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let owned_game_native_id = item
                    .get("catalogItemId")
                    .and_then(|n| n.as_str())
                    .map(String::from);
                Some(RemoteInventoryItem {
                    native_id,
                    name,
                    owned_game_native_id,
                })
            })
            .collect())
    }

    async fn refresh(&self, cred: &Credential) -> Result<Credential, ProviderError> {
        if cred.refresh_token.is_empty() {
            return Err(ProviderError::AuthRequired);
        }
        tracing::info!("Refreshing Epic OAuth token");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", cred.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let (status, body) = self.http.post_form(TOKEN_URL, &params).await?;
        parse_token_response(status, &body)
    }
}

fn parse_token_response(status: u16, body: &str) -> Result<Credential, ProviderError> {
    if !(200..300).contains(&status) {
        let err: ErrorResponse = serde_json::from_str(body).unwrap_or(ErrorResponse {
            error_code: Some(status.to_string()),
            error_message: Some(body.to_string()),
        });
        return Err(ProviderError::TokenRefreshFailed(format!(
            "{}: {}",
            err.error_code.unwrap_or_default(),
            err.error_message.unwrap_or_default()
        )));
    }

    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ExchangeFailed(format!("failed to parse response: {e}")))?;

    Ok(Credential {
        access_token: token.access_token,
        refresh_token: token.refresh_token.unwrap_or_default(),
        expires_at: Utc::now().timestamp() + token.expires_in,
        user_id: token.account_id.unwrap_or_default(),
    })
}

fn normalize_library_record(record: LibraryRecord) -> Option<RemoteGame> {
    let native_id = record.catalog_item_id.filter(|id| !id.is_empty())?;
    let title = record
        .sandbox_name
        .or(record.app_name)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Item {native_id}"));
    let metadata_json = record
        .namespace
        .map(|ns| serde_json::json!({ "namespace": ns }).to_string());

    Some(RemoteGame {
        native_id,
        title,
        metadata_json,
        ..Default::default()
    })
}
