use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::AuthError;

use super::clock::{Clock, SystemClock};
use super::credentials::CredentialStore;
use super::device;
use super::poller::{AuthorizationPoller, PollPolicy};
use super::refresh;
use super::types::{ClientCredential, OAuthEndpoints, TokenRecord};

/// A record is usable only while `now` is strictly before its expiry
pub fn is_valid(record: &TokenRecord, now: DateTime<Utc>) -> bool {
    now < record.expires_at
}

/// Authentication manager
/// Owns the active token record, refreshes it, and falls back to device login
pub struct AuthManager {
    /// Client identity from the secrets file
    credential: ClientCredential,

    /// Current token record, replaced wholesale on refresh or login
    record: RwLock<Option<TokenRecord>>,

    /// Where records are persisted
    store: Arc<dyn CredentialStore>,

    /// Authorization server
    endpoints: OAuthEndpoints,

    /// HTTP client for OAuth requests
    client: Client,

    clock: Arc<dyn Clock>,

    /// Refresh this long before expiry (zero = only once expired).
    /// `None` when the configured value does not fit a duration; every
    /// token is then treated as due for refresh.
    refresh_threshold: Option<Duration>,

    poll_policy: PollPolicy,
}

impl AuthManager {
    /// Create a manager from the credential store.
    /// Fails with `ConfigMissing` when the client secrets cannot be read.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoints: OAuthEndpoints,
        refresh_threshold: u64,
        poll_policy: PollPolicy,
    ) -> Result<Self, AuthError> {
        let credential = store.load_client_credential()?;
        let record = store.load_token_record();

        match &record {
            Some(r) => tracing::info!("Loaded token record, expires: {}", r.expires_at.to_rfc3339()),
            None => tracing::info!("No access token on file, device login will be required"),
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(AuthError::from)?;

        Ok(Self {
            credential,
            record: RwLock::new(record),
            store,
            endpoints,
            client,
            clock: Arc::new(SystemClock),
            refresh_threshold: i64::try_from(refresh_threshold)
                .ok()
                .and_then(Duration::try_seconds),
            poll_policy,
        })
    }

    /// Replace the time source (tests and scripted runs)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check if the record should be refreshed now
    fn needs_refresh(&self, record: &TokenRecord, now: DateTime<Utc>) -> bool {
        match self
            .refresh_threshold
            .and_then(|threshold| now.checked_add_signed(threshold))
        {
            Some(deadline) => !is_valid(record, deadline),
            None => true,
        }
    }

    /// Snapshot of the current record
    pub async fn current_record(&self) -> Option<TokenRecord> {
        self.record.read().await.clone()
    }

    /// Exchange the record's refresh token and persist the result.
    /// The cached record is left alone; callers swap in the returned value.
    pub async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, AuthError> {
        let refreshed = refresh::refresh_access_token(
            &self.client,
            &self.endpoints,
            &self.credential,
            record,
            self.clock.as_ref(),
        )
        .await?;

        self.store.save_token_record(&refreshed)?;
        Ok(refreshed)
    }

    /// Get a valid access token, refreshing if necessary.
    /// Fails with `NeedsLogin` when there is no record or it cannot be refreshed.
    pub async fn get_bearer_token(&self) -> Result<String, AuthError> {
        {
            let record = self.record.read().await;
            match record.as_ref() {
                None => return Err(AuthError::NeedsLogin("no access token on file".to_string())),
                Some(r) if !self.needs_refresh(r, self.clock.now()) => {
                    return Ok(r.access_token.clone());
                }
                Some(_) => {}
            }
        }

        // Hold the write lock so only one refresh runs at a time
        let mut guard = self.record.write().await;
        let current = match guard.clone() {
            Some(current) => current,
            None => return Err(AuthError::NeedsLogin("no access token on file".to_string())),
        };

        // Someone else may have refreshed while we waited for the lock
        if !self.needs_refresh(&current, self.clock.now()) {
            return Ok(current.access_token);
        }

        tracing::info!("The access token is expired or expiring soon, refreshing...");
        match self.refresh(&current).await {
            Ok(refreshed) => {
                let token = refreshed.access_token.clone();
                *guard = Some(refreshed);
                Ok(token)
            }
            Err(AuthError::Persistence(e)) => Err(AuthError::Persistence(e)),
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);

                // Graceful degradation: if token isn't actually expired yet, use it
                if is_valid(&current, self.clock.now()) {
                    tracing::warn!("Using existing token despite refresh failure (not yet expired)");
                    return Ok(current.access_token);
                }

                Err(AuthError::NeedsLogin(e.to_string()))
            }
        }
    }

    /// Refresh even though the cached token looks valid (the API said 401)
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut guard = self.record.write().await;
        let current = match guard.clone() {
            Some(current) => current,
            None => return Err(AuthError::NeedsLogin("no access token on file".to_string())),
        };

        match self.refresh(&current).await {
            Ok(refreshed) => {
                let token = refreshed.access_token.clone();
                *guard = Some(refreshed);
                Ok(token)
            }
            Err(AuthError::RefreshRejected { status, body }) => Err(AuthError::NeedsLogin(
                format!("refresh token rejected: {} - {}", status, body),
            )),
            Err(e) => Err(e),
        }
    }

    /// Run the full device authorization flow and cache the new record
    pub async fn login(&self, cancel: &CancellationToken) -> Result<TokenRecord, AuthError> {
        tracing::info!("Starting device authorization login...");

        let session =
            device::request_device_code(&self.client, &self.endpoints, &self.credential.client_id)
                .await?;
        device::display_user_code(&session);

        let poller = AuthorizationPoller::new(
            &self.client,
            &self.endpoints,
            &self.credential,
            self.store.as_ref(),
            self.clock.as_ref(),
            self.poll_policy.clone(),
        );
        let record = poller.run(&session, cancel).await?;

        *self.record.write().await = Some(record.clone());
        Ok(record)
    }

    /// Bearer token from cache or refresh, falling back to device login
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<String, AuthError> {
        match self.get_bearer_token().await {
            Ok(token) => Ok(token),
            Err(AuthError::NeedsLogin(reason)) => {
                tracing::info!("{}, starting the normal login process...", reason);
                Ok(self.login(cancel).await?.access_token)
            }
            Err(e) => Err(e),
        }
    }
}
