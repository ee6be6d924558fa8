// Device authorization poller
//
// Polls the token endpoint until the user approves the device, the server
// refuses, or we give up. The transition logic is a pure function over the
// classified server answer; the driver only does I/O and sleeping.

use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::AuthError;

use super::clock::Clock;
use super::credentials::CredentialStore;
use super::mask_token;
use super::types::{
    ClientCredential, DeviceAuthorizationSession, OAuthEndpoints, OAuthErrorBody, TokenRecord,
    TokenResponse, DEVICE_CODE_GRANT_TYPE,
};

/// Interval growth applied on every `slow_down`
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Overall time allowed for the user to approve the device
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(15 * 60);

/// Poller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    WaitingForUser,
    Backoff,
    Authorized,
    DeniedFatal,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Authorized | PollState::DeniedFatal)
    }
}

/// One token endpoint answer, classified
#[derive(Debug)]
pub enum PollOutcome {
    Granted(TokenResponse),
    Pending,
    SlowDown,
    Fatal(AuthError),
}

/// What the driver does next
#[derive(Debug)]
pub enum Transition {
    /// Sleep `interval`, then poll again. `state` is `WaitingForUser` or `Backoff`.
    Wait { state: PollState, interval: Duration },
    Authorized(TokenResponse),
    DeniedFatal(AuthError),
}

impl Transition {
    pub fn state(&self) -> PollState {
        match self {
            Transition::Wait { state, .. } => *state,
            Transition::Authorized(_) => PollState::Authorized,
            Transition::DeniedFatal(_) => PollState::DeniedFatal,
        }
    }
}

/// Pure transition function. `interval` is the current effective interval;
/// a `slow_down` multiplies it by `backoff_factor` and the result is kept
/// for every later poll.
pub fn transition(outcome: PollOutcome, interval: Duration, backoff_factor: u32) -> Transition {
    match outcome {
        PollOutcome::Granted(grant) => Transition::Authorized(grant),
        PollOutcome::Pending => Transition::Wait {
            state: PollState::WaitingForUser,
            interval,
        },
        PollOutcome::SlowDown => Transition::Wait {
            state: PollState::Backoff,
            interval: interval.saturating_mul(backoff_factor.max(1)),
        },
        PollOutcome::Fatal(err) => Transition::DeniedFatal(err),
    }
}

/// Classify a token endpoint response.
///
/// Error codes in the body win; the bare 428/425 status codes Google used to
/// send without a body are understood as pending/slow_down.
pub fn classify_response(status: u16, body: &str) -> PollOutcome {
    if status == 200 {
        return match serde_json::from_str::<TokenResponse>(body) {
            Ok(grant) if grant.access_token.is_empty() => PollOutcome::Fatal(
                AuthError::InvalidResponse("token response has an empty access_token".to_string()),
            ),
            Ok(grant) => PollOutcome::Granted(grant),
            Err(e) => PollOutcome::Fatal(AuthError::InvalidResponse(format!(
                "token response: {}",
                e
            ))),
        };
    }

    let error = OAuthErrorBody::parse(body);
    let is_client_error = (400..500).contains(&status);

    if error.is_quota_exceeded() {
        return PollOutcome::Fatal(AuthError::QuotaExceeded(body.to_string()));
    }

    match (is_client_error, error.code()) {
        (true, Some("authorization_pending")) => PollOutcome::Pending,
        (true, Some("slow_down")) => PollOutcome::SlowDown,
        (true, Some("access_denied")) => PollOutcome::Fatal(AuthError::AccessDenied(
            error
                .error_description
                .clone()
                .unwrap_or_else(|| "user declined the request".to_string()),
        )),
        (true, Some("expired_token")) => PollOutcome::Fatal(AuthError::DeviceCodeExpired),
        (_, None) if status == 428 => PollOutcome::Pending,
        (_, None) if status == 425 => PollOutcome::SlowDown,
        (_, None) if status == 403 => PollOutcome::Fatal(AuthError::QuotaExceeded(body.to_string())),
        _ => PollOutcome::Fatal(AuthError::ServerError {
            status,
            body: body.to_string(),
        }),
    }
}

/// Limits applied while waiting for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub backoff_factor: u32,
    pub max_wait: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_wait: Some(DEFAULT_MAX_WAIT),
            max_attempts: None,
        }
    }
}

/// Drives one device login to completion
pub struct AuthorizationPoller<'a> {
    client: &'a Client,
    endpoints: &'a OAuthEndpoints,
    credential: &'a ClientCredential,
    store: &'a dyn CredentialStore,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> AuthorizationPoller<'a> {
    pub fn new(
        client: &'a Client,
        endpoints: &'a OAuthEndpoints,
        credential: &'a ClientCredential,
        store: &'a dyn CredentialStore,
        clock: &'a dyn Clock,
        policy: PollPolicy,
    ) -> Self {
        Self {
            client,
            endpoints,
            credential,
            store,
            clock,
            policy,
        }
    }

    /// Poll until the user approves. The new record is persisted before it is
    /// returned; a failed save is an error even though the token is valid.
    pub async fn run(
        &self,
        session: &DeviceAuthorizationSession,
        cancel: &CancellationToken,
    ) -> Result<TokenRecord, AuthError> {
        let started = self.clock.now();
        let mut interval = Duration::from_secs(session.poll_interval.max(1));
        let mut state = PollState::WaitingForUser;
        let mut attempts: u32 = 0;

        // The user needs time to open the URL before the first check
        self.wait(interval, cancel).await?;

        loop {
            if let Some(max_attempts) = self.policy.max_attempts {
                if attempts >= max_attempts {
                    tracing::error!("Giving up after {} authorization polls", attempts);
                    return Err(AuthError::PollTimeout { attempts });
                }
            }

            attempts += 1;
            let outcome = self.poll_once(session).await?;
            let next = transition(outcome, interval, self.policy.backoff_factor);
            tracing::debug!(
                attempt = attempts,
                from = ?state,
                to = ?next.state(),
                "Authorization poll transition"
            );
            state = next.state();

            match next {
                Transition::Authorized(grant) => return self.complete(grant),
                Transition::DeniedFatal(err) => {
                    tracing::error!("Authorization failed: {}", err);
                    return Err(err);
                }
                Transition::Wait {
                    state: PollState::Backoff,
                    interval: enlarged,
                } => {
                    tracing::warn!(
                        "Polling too fast, backing off from {}s to {}s",
                        interval.as_secs(),
                        enlarged.as_secs()
                    );
                    interval = enlarged;
                }
                Transition::Wait { .. } => {
                    tracing::info!(
                        "Still waiting for authorization, checking again in {}s...",
                        interval.as_secs()
                    );
                }
            }

            if let Some(max_wait) = self.policy.max_wait {
                let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
                if elapsed + interval > max_wait {
                    tracing::error!(
                        "Authorization not completed within {}s",
                        max_wait.as_secs()
                    );
                    return Err(AuthError::PollTimeout { attempts });
                }
            }

            self.wait(interval, cancel).await?;
            if state == PollState::Backoff {
                state = PollState::WaitingForUser;
            }
        }
    }

    async fn poll_once(&self, session: &DeviceAuthorizationSession) -> Result<PollOutcome, AuthError> {
        let form = [
            ("client_id", self.credential.client_id.as_str()),
            ("client_secret", self.credential.client_secret.as_str()),
            ("device_code", session.device_code.as_str()),
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
        ];

        let response = self
            .client
            .post(self.endpoints.token_url())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status, "Token endpoint answered");
        Ok(classify_response(status, &body))
    }

    fn complete(&self, grant: TokenResponse) -> Result<TokenRecord, AuthError> {
        let refresh_token = grant.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::InvalidResponse("device grant did not include a refresh_token".to_string())
        })?;

        let record = TokenRecord::issued(
            grant.access_token,
            refresh_token,
            self.clock.now(),
            grant.expires_in,
        )?;
        self.store.save_token_record(&record)?;

        tracing::info!(
            "Authorization successful ({}), expires: {}",
            mask_token(&record.access_token),
            record.expires_at.to_rfc3339()
        );
        Ok(record)
    }

    async fn wait(&self, interval: Duration, cancel: &CancellationToken) -> Result<(), AuthError> {
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Authorization polling cancelled");
                Err(AuthError::Cancelled)
            }
            _ = self.clock.sleep(interval) => Ok(()),
        }
    }
}
