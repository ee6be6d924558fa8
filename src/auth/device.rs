// Device authorization request (first half of the device flow)

use reqwest::Client;

use crate::error::AuthError;

use super::types::{
    DeviceAuthorizationSession, DeviceCodeResponse, OAuthEndpoints, OAuthErrorBody,
    DEFAULT_POLL_INTERVAL_SECS,
};

/// Ask the authorization server for a device code and a user code.
///
/// A 403 carrying a rate-limit error is `QuotaExceeded` and is not retried;
/// quota resets happen on the server's schedule, not ours.
pub async fn request_device_code(
    client: &Client,
    endpoints: &OAuthEndpoints,
    client_id: &str,
) -> Result<DeviceAuthorizationSession, AuthError> {
    let url = endpoints.device_code_url();
    tracing::debug!("Requesting device and user codes from {}", url);

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("scope", endpoints.scope.as_str())])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::OK {
        let data: DeviceCodeResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("device code response: {}", e)))?;

        let poll_interval = match data.interval {
            Some(secs) if secs >= 1 => secs,
            _ => DEFAULT_POLL_INTERVAL_SECS,
        };

        tracing::info!("Successfully retrieved device and user codes");
        tracing::debug!(
            user_code = %data.user_code,
            verification_url = %data.verification_url,
            interval = poll_interval,
            "Device authorization started"
        );

        return Ok(DeviceAuthorizationSession {
            device_code: data.device_code,
            user_code: data.user_code,
            verification_url: data.verification_url,
            poll_interval,
        });
    }

    let error = OAuthErrorBody::parse(&body);
    if status == reqwest::StatusCode::FORBIDDEN && error.is_quota_exceeded() {
        tracing::error!("API quota has been exceeded for this client");
        return Err(AuthError::QuotaExceeded(body));
    }

    tracing::error!(
        "Unable to request device and user codes: status={}, body={}",
        status,
        body
    );
    Err(AuthError::ServerError {
        status: status.as_u16(),
        body,
    })
}

/// Tell the human where to approve this device
pub fn display_user_code(session: &DeviceAuthorizationSession) {
    println!();
    println!("  To authorize this application, visit:");
    println!();
    println!("      {}", session.verification_url);
    println!();
    println!("  and enter the code:  {}", session.user_code);
    println!();
    tracing::info!(
        "Waiting for approval at {} with code {}",
        session.verification_url,
        session.user_code
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_request_device_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/device/code")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("scope".into(), "https://www.googleapis.com/auth/youtube".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"device_code":"D1","user_code":"U1","verification_url":"https://ex.com/v","expires_in":1800,"interval":5}"#,
            )
            .create_async()
            .await;

        let endpoints = OAuthEndpoints::new(server.url(), "https://www.googleapis.com/auth/youtube");
        let session = request_device_code(&Client::new(), &endpoints, "cid")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            session,
            DeviceAuthorizationSession {
                device_code: "D1".to_string(),
                user_code: "U1".to_string(),
                verification_url: "https://ex.com/v".to_string(),
                poll_interval: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/device/code")
            .with_status(200)
            .with_body(r#"{"device_code":"D","user_code":"U","verification_url":"https://ex.com/v","interval":0}"#)
            .create_async()
            .await;

        let session = request_device_code(
            &Client::new(),
            &OAuthEndpoints::new(server.url(), "scope"),
            "cid",
        )
        .await
        .unwrap();
        assert_eq!(session.poll_interval, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[tokio::test]
    async fn test_rate_limited_is_quota_exceeded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/device/code")
            .with_status(403)
            .with_body(r#"{"error_code":"rate_limit_exceeded","error":"Rate limit exceeded"}"#)
            .create_async()
            .await;

        let err = request_device_code(
            &Client::new(),
            &OAuthEndpoints::new(server.url(), "scope"),
            "cid",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_other_failure_is_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/device/code")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let err = request_device_code(
            &Client::new(),
            &OAuthEndpoints::new(server.url(), "scope"),
            "cid",
        )
        .await
        .unwrap_err();
        match err {
            AuthError::ServerError { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
