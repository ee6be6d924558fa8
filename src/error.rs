// Error handling module
// Defines the authentication and YouTube API error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while obtaining or maintaining the OAuth credential
#[derive(Error, Debug)]
pub enum AuthError {
    /// Client secrets file is missing or unreadable
    #[error("Client secrets not available at {path}: {reason}")]
    ConfigMissing { path: PathBuf, reason: String },

    /// API quota exhausted for this client
    #[error("API quota has been exceeded: {0}")]
    QuotaExceeded(String),

    /// Unexpected response from the authorization server
    #[error("Authorization server error: {status} - {body}")]
    ServerError { status: u16, body: String },

    /// Refresh token was refused; a new device login is required
    #[error("Refresh token rejected: {status} - {body}")]
    RefreshRejected { status: u16, body: String },

    /// Token was obtained but could not be written to disk
    #[error("Failed to persist token record: {0}")]
    Persistence(String),

    /// No usable token on file
    #[error("Login required: {0}")]
    NeedsLogin(String),

    /// User refused the authorization request
    #[error("Authorization was denied: {0}")]
    AccessDenied(String),

    /// Device code expired before the user approved it
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,

    /// Gave up polling after the configured limit
    #[error("Gave up waiting for authorization after {attempts} attempts")]
    PollTimeout { attempts: u32 },

    /// Login interrupted by shutdown
    #[error("Authorization was cancelled")]
    Cancelled,

    /// Transport failure talking to the authorization server
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

/// Errors raised by authenticated YouTube Data API calls
#[derive(Error, Debug)]
pub enum ApiError {
    /// Could not obtain a bearer token
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Error from the YouTube API
    #[error("YouTube API error: {status} - {message}")]
    YouTube { status: u16, message: String },

    /// The requested channel, video or playlist does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::YouTube { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_messages() {
        let err = AuthError::ServerError {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Authorization server error: 500 - boom");

        let err = AuthError::QuotaExceeded("rate_limit_exceeded".to_string());
        assert_eq!(
            err.to_string(),
            "API quota has been exceeded: rate_limit_exceeded"
        );

        let err = AuthError::PollTimeout { attempts: 7 };
        assert_eq!(
            err.to_string(),
            "Gave up waiting for authorization after 7 attempts"
        );
    }

    #[test]
    fn test_config_missing_message() {
        let err = AuthError::ConfigMissing {
            path: PathBuf::from("/tmp/client_secrets.json"),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Client secrets not available at /tmp/client_secrets.json: No such file or directory"
        );
    }

    #[test]
    fn test_api_error_wraps_auth_error() {
        let err: ApiError = AuthError::NeedsLogin("no token on file".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Authentication failed: Login required: no token on file"
        );
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_youtube_error_message() {
        let err = ApiError::YouTube {
            status: 403,
            message: "quotaExceeded".to_string(),
        };
        assert_eq!(err.to_string(), "YouTube API error: 403 - quotaExceeded");
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_internal_error_message() {
        let err = ApiError::Internal(anyhow::anyhow!("Something went wrong"));
        assert_eq!(err.to_string(), "Internal error: Something went wrong");
    }
}
