// Authentication module
// OAuth 2.0 device authorization flow and token lifecycle

mod clock;
mod credentials;
mod device;
mod manager;
mod poller;
mod refresh;
mod types;

pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
pub use credentials::{CredentialStore, FileCredentialStore};
pub use device::{display_user_code, request_device_code};
pub use manager::{is_valid, AuthManager};
pub use poller::{
    classify_response, transition, AuthorizationPoller, PollOutcome, PollPolicy, PollState,
    Transition, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_WAIT,
};
pub use refresh::refresh_access_token;
pub use types::{
    ClientCredential, DeviceAuthorizationSession, OAuthEndpoints, TokenRecord, TokenResponse,
    DEFAULT_AUTH_BASE_URL, DEFAULT_SCOPE,
};

pub(crate) use credentials::write_atomic;

/// Mask a token for logging: first 4 characters, then asterisks
pub fn mask_token(token: &str) -> String {
    match token.char_indices().nth(4) {
        Some((idx, _)) => format!("{}****", &token[..idx]),
        None => "*".repeat(token.chars().count()),
    }
}
