// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Grant type sent while polling the token endpoint during device login
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant type sent when exchanging a refresh token
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Poll interval used when the server omits one (or sends zero)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default Google authorization server
pub const DEFAULT_AUTH_BASE_URL: &str = "https://oauth2.googleapis.com";

/// Scope needed to rate videos
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/youtube";

/// Authorization server location and requested scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub base_url: String,
    pub scope: String,
}

impl OAuthEndpoints {
    pub fn new(base_url: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            scope: scope.into(),
        }
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/device/code", self.base_url.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_BASE_URL, DEFAULT_SCOPE)
    }
}

/// OAuth client identity loaded from the client secrets file
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredential {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Device/user code pair for one login attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    /// Minimum seconds between polls, always >= 1
    pub poll_interval: u64,
}

/// Persisted access/refresh token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Build a record issued at `issued_at` that lives for `expires_in` seconds.
    /// A lifetime that does not fit a timestamp is an invalid server response.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        issued_at: DateTime<Utc>,
        expires_in: u64,
    ) -> Result<Self, AuthError> {
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
            })?;

        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Client secrets file as downloaded from the Google Cloud console
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ClientSecretsFile {
    Installed { installed: ClientSecretsEntry },
    Web { web: ClientSecretsEntry },
    Flat(ClientSecretsEntry),
}

#[derive(Deserialize)]
pub(crate) struct ClientSecretsEntry {
    pub client_id: String,
    pub client_secret: String,
}

impl From<ClientSecretsFile> for ClientCredential {
    fn from(file: ClientSecretsFile) -> Self {
        let entry = match file {
            ClientSecretsFile::Installed { installed } => installed,
            ClientSecretsFile::Web { web } => web,
            ClientSecretsFile::Flat(entry) => entry,
        };
        Self {
            client_id: entry.client_id,
            client_secret: entry.client_secret,
        }
    }
}

/// `/device/code` success response
#[derive(Debug, Deserialize)]
pub(crate) struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// `/token` success response, for both device grants and refreshes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// OAuth error body. Google sometimes reports quota problems as `error_code`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OAuthErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    /// The error code, preferring `error` over `error_code`
    pub fn code(&self) -> Option<&str> {
        self.error.as_deref().or(self.error_code.as_deref())
    }

    pub fn is_quota_exceeded(&self) -> bool {
        [self.error.as_deref(), self.error_code.as_deref()]
            .into_iter()
            .flatten()
            .any(|code| QUOTA_ERROR_CODES.contains(&code))
    }
}

const QUOTA_ERROR_CODES: [&str; 4] = [
    "rate_limit_exceeded",
    "quota_exceeded",
    "quotaExceeded",
    "userRateLimitExceeded",
];
