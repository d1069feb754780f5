//! Platform provider clients: Steam, Epic, and GOG.
//!
//! Each client authenticates against one remote platform and fetches
//! normalized profile, friends, library, and inventory data. Remote shapes
//! differ wildly; everything crossing this crate's boundary is one of the
//! normalized records below.

pub mod epic;
pub mod gog;
mod request;
pub mod steam;

use serde::{Deserialize, Serialize};

/// Opaque access credential for one provider account.
///
/// The caller is responsible for persisting this (encrypted, via the
/// accounts store). Steam has no token flow: the API key lives in
/// `access_token` and never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix seconds; 0 means "does not expire".
    #[serde(default)]
    pub expires_at: i64,
    /// Platform user id this credential belongs to.
    pub user_id: String,
}

/// Resolved identity of the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub user_id: String,
    pub display_name: String,
}

/// One library entry as reported by a provider. Partial data is the norm:
/// anything optional here was simply missing upstream.
#[derive(Debug, Clone, Default)]
pub struct RemoteGame {
    pub native_id: String,
    pub title: String,
    pub playtime_seconds: Option<i64>,
    pub cover_url: Option<String>,
    pub background_url: Option<String>,
    pub last_played_at: Option<String>,
    pub metadata_json: Option<String>,
}

/// One friends-list entry. Fields the provider did not expose are empty
/// or "unknown", never an error.
#[derive(Debug, Clone, Default)]
pub struct RemoteFriend {
    pub external_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub presence: String,
    pub activity: String,
}

/// One inventory item (DLC, in-game item) for platforms that expose one.
#[derive(Debug, Clone)]
pub struct RemoteInventoryItem {
    pub native_id: String,
    pub name: String,
    pub owned_game_native_id: Option<String>,
}

/// Common fetch surface of the three provider clients. Static dispatch;
/// the orchestrator matches on platform and hands the right client in.
pub trait Provider {
    fn platform_name(&self) -> &'static str;

    async fn fetch_profile(&self, cred: &Credential) -> Result<ProviderProfile, ProviderError>;

    async fn fetch_friends(&self, cred: &Credential) -> Result<Vec<RemoteFriend>, ProviderError>;

    async fn fetch_library(&self, cred: &Credential) -> Result<Vec<RemoteGame>, ProviderError>;

    /// Platforms without an inventory surface return an empty list.
    async fn fetch_inventory(
        &self,
        _cred: &Credential,
    ) -> Result<Vec<RemoteInventoryItem>, ProviderError> {
        Ok(Vec::new())
    }

    /// Non-interactive re-authentication after an auth failure. Clients
    /// that cannot refresh return `AuthRequired`.
    async fn refresh(&self, cred: &Credential) -> Result<Credential, ProviderError>;
}

/// Unified error type for provider clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("provider credentials not configured")]
    NotConfigured,

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),

#[error("authentication required: no usable credential")]
    AuthRequired,

    #[error("refreshed identity {got} does not match account {expected}")]
    IdentityMismatch { expected: String, got: String },

    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("request timed out")]
    Timeout,
}

impl ProviderError {
    /// Auth-shaped failures trigger the refresh path instead of a retry.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthRequired
                | ProviderError::TokenRefreshFailed(_)
                | ProviderError::IdentityMismatch { .. }
                | ProviderError::ApiError { status: 401, .. }
                | ProviderError::ApiError { status: 403, .. }
        )
    }
}
