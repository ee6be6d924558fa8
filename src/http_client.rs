use anyhow::Context;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::{ApiError, Result};
use crate::models::youtube::{
    ChannelResource, ListResponse, PlaylistItem, SearchResult, VideoResource,
};
use crate::models::{ChannelRef, Video, VideoPage};

/// Upper bound on pages fetched for one playlist
const MAX_PLAYLIST_PAGES: usize = 500;

/// Authenticated YouTube Data API client with retry logic
pub struct YouTubeClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Authentication manager
    auth_manager: Arc<AuthManager>,

    /// API host, e.g. https://youtube.googleapis.com
    base_url: String,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl YouTubeClient {
    /// Create a new API client
    pub fn new(
        auth_manager: Arc<AuthManager>,
        base_url: impl Into<String>,
        connect_timeout: u64,
        request_timeout: u64,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            auth_manager,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries,
            base_delay_ms: 1000, // 1 second base delay
        })
    }

    /// Override the backoff base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Execute a request with retry logic
    /// Automatically handles:
    /// - 401: refreshes the token once and retries
    /// - 429: exponential backoff
    /// - 5xx: exponential backoff
    ///
    /// 403 is quota or permission trouble and is returned immediately.
    async fn send(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        let mut refreshed = false;

        tracing::debug!(method = %method, url = %url, "Sending YouTube API request");

        loop {
            let token = self.auth_manager.get_bearer_token().await?;

            let result = self
                .client
                .request(method.clone(), &url)
                .query(query)
                .bearer_auth(&token)
                .header("Accept", "application/json")
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    tracing::debug!(status = %status, attempt = attempt + 1, "Received HTTP response");

                    if status.is_success() {
                        return Ok(response);
                    }

                    match status.as_u16() {
                        401 if !refreshed => {
                            tracing::warn!("Received 401, refreshing token and retrying...");
                            self.auth_manager.force_refresh().await?;
                            refreshed = true;
                            continue;
                        }

                        429 | 500..=599 if attempt < self.max_retries => {
                            let delay = self.calculate_backoff_delay(attempt);
                            tracing::warn!(
                                "Received {}, retrying after {}ms (attempt {}/{})",
                                status,
                                delay,
                                attempt + 1,
                                self.max_retries
                            );
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            attempt += 1;
                            continue;
                        }

                        _ => {}
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::error!(
                        status = status.as_u16(),
                        url = %url,
                        response_body = %error_text,
                        attempt = attempt + 1,
                        "YouTube API request failed"
                    );

                    if status == StatusCode::NOT_FOUND {
                        return Err(ApiError::NotFound(url));
                    }
                    return Err(ApiError::YouTube {
                        status: status.as_u16(),
                        message: error_text,
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_decode() {
                        "decode_error"
                    } else {
                        "request_error"
                    };

                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            error_kind = error_kind,
                            error = %e,
                            "Request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );
                    return Err(ApiError::Internal(anyhow::anyhow!(
                        "HTTP request failed: {} (kind: {})",
                        e,
                        error_kind
                    )));
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.send(Method::GET, path, query).await?;
        let parsed = response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))?;
        Ok(parsed)
    }

    /// Exponential backoff: base_delay * 2^attempt, plus up to 10% jitter
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
        let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
        delay.saturating_add(jitter)
    }

    /// Fetch the authorized user's own channel; proves the token works
    pub async fn test_api(&self) -> Result<ChannelRef> {
        let list: ListResponse<ChannelResource> = self
            .get_json("/youtube/v3/channels", &[("part", "snippet"), ("mine", "true")])
            .await?;

        let channel = list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound("no channel for the authorized account".to_string()))?;

        Ok(ChannelRef {
            title: channel.snippet.map(|s| s.title).unwrap_or_default(),
            id: channel.id,
        })
    }

    /// Find a channel whose title equals `name`, ignoring case
    pub async fn search_channel(&self, name: &str) -> Result<ChannelRef> {
        let list: ListResponse<SearchResult> = self
            .get_json(
                "/youtube/v3/search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("maxResults", "25"),
                    ("q", name),
                ],
            )
            .await?;

        let needle = name.trim().to_lowercase();
        list.items
            .into_iter()
            .filter(|item| item.id.kind == "youtube#channel")
            .find(|item| item.snippet.title.to_lowercase() == needle)
            .and_then(|item| {
                Some(ChannelRef {
                    id: item.id.channel_id?,
                    title: item.snippet.title,
                })
            })
            .ok_or_else(|| ApiError::NotFound(format!("channel named {:?}", name)))
    }

    /// Look up a single video
    pub async fn video(&self, video_id: &str) -> Result<VideoResource> {
        let list: ListResponse<VideoResource> = self
            .get_json("/youtube/v3/videos", &[("part", "snippet"), ("id", video_id)])
            .await?;

        list.items
            .into_iter()
            .find(|v| v.id == video_id)
            .ok_or_else(|| ApiError::NotFound(format!("video {}", video_id)))
    }

    /// Channel that published the given video
    pub async fn channel_from_video(&self, video_id: &str) -> Result<ChannelRef> {
        let video = self.video(video_id).await?;
        Ok(ChannelRef {
            id: video.snippet.channel_id,
            title: video.snippet.channel_title,
        })
    }

    /// The channel's "uploads" playlist
    pub async fn uploads_playlist_id(&self, channel_id: &str) -> Result<String> {
        let list: ListResponse<ChannelResource> = self
            .get_json(
                "/youtube/v3/channels",
                &[("part", "contentDetails"), ("id", channel_id)],
            )
            .await?;

        list.items
            .into_iter()
            .next()
            .and_then(|c| c.content_details)
            .and_then(|d| d.related_playlists.uploads)
            .ok_or_else(|| ApiError::NotFound(format!("uploads playlist for channel {}", channel_id)))
    }

    /// One page of playlist entries, newest first for uploads playlists
    pub async fn playlist_videos(&self, playlist_id: &str, page_token: Option<&str>) -> Result<VideoPage> {
        let mut query = vec![
            ("part", "snippet"),
            ("maxResults", "10"),
            ("playlistId", playlist_id),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let list: ListResponse<PlaylistItem> = self.get_json("/youtube/v3/playlistItems", &query).await?;
        Ok(VideoPage::from(list))
    }

    /// Every video in a playlist, following page tokens.
    /// Stops on a repeated token or after `MAX_PLAYLIST_PAGES` pages.
    pub async fn all_playlist_videos(&self, playlist_id: &str) -> Result<Vec<Video>> {
        let mut videos = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PLAYLIST_PAGES {
            let page = self.playlist_videos(playlist_id, page_token.as_deref()).await?;
            videos.extend(page.videos);
            match page.next_page {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    tracing::warn!("Playlist {} repeated page token {:?}, stopping", playlist_id, next);
                    return Ok(videos);
                }
                Some(next) => page_token = Some(next),
                None => return Ok(videos),
            }
        }

        tracing::warn!(
            "Playlist {} has more than {} pages, stopping early",
            playlist_id,
            MAX_PLAYLIST_PAGES
        );
        Ok(videos)
    }

    /// Leave a like; the API answers 204 on success
    pub async fn like_video(&self, video_id: &str) -> Result<()> {
        let response = self
            .send(
                Method::POST,
                "/youtube/v3/videos/rate",
                &[("id", video_id), ("rating", "like")],
            )
            .await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(ApiError::YouTube {
                status: response.status().as_u16(),
                message: "expected 204 No Content from videos.rate".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        ClientCredential, CredentialStore, ManualClock, OAuthEndpoints, PollPolicy, TokenRecord,
    };
    use crate::error::AuthError;
    use chrono::{Duration as ChronoDuration, Utc};
    use mockito::Matcher;
    use std::sync::Mutex;

    struct FixedStore(Mutex<Option<TokenRecord>>);

    impl CredentialStore for FixedStore {
        fn load_client_credential(&self) -> std::result::Result<ClientCredential, AuthError> {
            Ok(ClientCredential {
                client_id: "cid".to_string(),
                client_secret: "csecret".to_string(),
            })
        }

        fn load_token_record(&self) -> Option<TokenRecord> {
            self.0.lock().unwrap().clone()
        }

        fn save_token_record(&self, record: &TokenRecord) -> std::result::Result<(), AuthError> {
            *self.0.lock().unwrap() = Some(record.clone());
            Ok(())
        }
    }

    fn client_for(server: &mockito::ServerGuard) -> YouTubeClient {
        let now = Utc::now();
        let store = Arc::new(FixedStore(Mutex::new(Some(TokenRecord {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: now + ChronoDuration::hours(1),
        }))));
        let auth = AuthManager::new(
            store,
            OAuthEndpoints::new(server.url(), "scope"),
            0,
            PollPolicy::default(),
        )
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(now)));

        YouTubeClient::new(Arc::new(auth), server.url(), 5, 5, 2)
            .unwrap()
            .with_base_delay_ms(1)
    }

    #[test]
    fn test_backoff_calculation() {
        let server = mockito::Server::new();
        let client = client_for(&server).with_base_delay_ms(1000);

        let delay0 = client.calculate_backoff_delay(0);
        let delay1 = client.calculate_backoff_delay(1);
        let delay2 = client.calculate_backoff_delay(2);

        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[tokio::test]
    async fn test_like_video_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/youtube/v3/videos/rate")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "aaaaaaaaaaa".into()),
                Matcher::UrlEncoded("rating".into(), "like".into()),
            ]))
            .match_header("authorization", "Bearer A1")
            .with_status(204)
            .create_async()
            .await;

        client_for(&server).like_video("aaaaaaaaaaa").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[{"id":"UCme","snippet":{"title":"Me"}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let channel = client_for(&server).test_api().await.unwrap();
        failing.assert_async().await;
        ok.assert_async().await;
        assert_eq!(
            channel,
            ChannelRef {
                id: "UCme".to_string(),
                title: "Me".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_quota_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server).search_channel("Anyone").await.unwrap_err();
        mock.assert_async().await;
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_unauthorized_triggers_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/youtube/v3/videos")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"A2","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/youtube/v3/videos")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"aaaaaaaaaaa","snippet":{"title":"T","channelId":"UCx","channelTitle":"X","publishedAt":"2025-01-12T10:30:00Z"}}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let channel = client_for(&server).channel_from_video("aaaaaaaaaaa").await.unwrap();
        rejected.assert_async().await;
        refresh.assert_async().await;
        accepted.assert_async().await;
        assert_eq!(channel.id, "UCx");
        assert_eq!(channel.title, "X");
    }

    #[tokio::test]
    async fn test_search_channel_requires_exact_title() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::UrlEncoded("q".into(), "ChristopherOdd".into()))
            .with_status(200)
            .with_body(
                r#"{"items":[
                    {"id":{"kind":"youtube#video","videoId":"v"},"snippet":{"title":"ChristopherOdd"}},
                    {"id":{"kind":"youtube#channel","channelId":"UCnear"},"snippet":{"title":"ChristopherOdd Clips"}},
                    {"id":{"kind":"youtube#channel","channelId":"UCodd"},"snippet":{"title":"christopherodd"}}
                ]}"#,
            )
            .create_async()
            .await;

        let channel = client_for(&server).search_channel("ChristopherOdd").await.unwrap();
        assert_eq!(channel.id, "UCodd");
    }

    #[tokio::test]
    async fn test_all_playlist_videos_stops_on_repeated_token() {
        let mut server = mockito::Server::new_async().await;
        let looping = server
            .mock("GET", "/youtube/v3/playlistItems")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"nextPageToken":"SAME","items":[{"snippet":{"title":"Loop","publishedAt":"2025-01-12T00:00:00Z","resourceId":{"videoId":"aaaaaaaaaaa"}}}]}"#)
            .expect(2)
            .create_async()
            .await;

        let videos = client_for(&server).all_playlist_videos("PLloop").await.unwrap();
        looping.assert_async().await;
        assert_eq!(videos.len(), 2);
    }

    #[tokio::test]
    async fn test_all_playlist_videos_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let second = server
            .mock("GET", "/youtube/v3/playlistItems")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "NEXT".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"snippet":{"title":"Two","publishedAt":"2025-01-11T00:00:00Z","resourceId":{"videoId":"bbbbbbbbbbb"}}}]}"#)
            .expect(1)
            .create_async()
            .await;
        let first = server
            .mock("GET", "/youtube/v3/playlistItems")
            .match_query(Matcher::UrlEncoded("playlistId".into(), "UUodd".into()))
            .with_status(200)
            .with_body(r#"{"nextPageToken":"NEXT","items":[{"snippet":{"title":"One","publishedAt":"2025-01-12T00:00:00Z","resourceId":{"videoId":"aaaaaaaaaaa"}}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let videos = client_for(&server).all_playlist_videos("UUodd").await.unwrap();
        first.assert_async().await;
        second.assert_async().await;
        let ids: Vec<&str> = videos.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
    }
}
