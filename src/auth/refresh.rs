// Token refresh logic

use reqwest::Client;

use crate::error::AuthError;

use super::clock::Clock;
use super::mask_token;
use super::types::{
    ClientCredential, OAuthEndpoints, OAuthErrorBody, TokenRecord, TokenResponse,
    REFRESH_GRANT_TYPE,
};

/// Exchange the stored refresh token for a new access token.
///
/// Returns a new record; the caller decides whether to persist and cache it.
/// Any non-200 answer is `RefreshRejected` and must not be retried, since the
/// refresh token itself may have been revoked.
pub async fn refresh_access_token(
    client: &Client,
    endpoints: &OAuthEndpoints,
    credential: &ClientCredential,
    record: &TokenRecord,
    clock: &dyn Clock,
) -> Result<TokenRecord, AuthError> {
    let url = endpoints.token_url();
    tracing::info!("Refreshing access token...");
    tracing::debug!(
        "Refresh request: url={}, client_id={}...",
        url,
        client_id_prefix(&credential.client_id)
    );

    let form = [
        ("client_id", credential.client_id.as_str()),
        ("client_secret", credential.client_secret.as_str()),
        ("refresh_token", record.refresh_token.as_str()),
        ("grant_type", REFRESH_GRANT_TYPE),
    ];

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Token refresh failed: status={}, body={}", status, body);

        let error = OAuthErrorBody::parse(&body);
        if let Some(code) = error.code() {
            tracing::error!(
                "Refresh error details: error={}, description={}",
                code,
                error.error_description.as_deref().unwrap_or("-")
            );
        }

        return Err(AuthError::RefreshRejected {
            status: status.as_u16(),
            body,
        });
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(format!("refresh response: {}", e)))?;

    if data.access_token.is_empty() {
        return Err(AuthError::InvalidResponse(
            "refresh response does not contain access_token".to_string(),
        ));
    }

    // Google only rotates the refresh token occasionally
    let refresh_token = data
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| record.refresh_token.clone());

    let refreshed =
        TokenRecord::issued(data.access_token, refresh_token, clock.now(), data.expires_in)?;

    tracing::info!(
        "Access token refreshed ({}), expires: {}",
        mask_token(&refreshed.access_token),
        refreshed.expires_at.to_rfc3339()
    );

    Ok(refreshed)
}

/// First 8 characters of the client id, for debug logs
fn client_id_prefix(client_id: &str) -> String {
    client_id.chars().take(8).collect()
}
