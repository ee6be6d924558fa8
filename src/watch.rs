// Watch pipeline: find videos, like them, download them

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channels::ChannelStore;
use crate::downloader::Downloader;
use crate::http_client::YouTubeClient;
use crate::matcher::{is_new_release, parse_playlist_id, parse_video_id, title_matches};
use crate::models::Video;

/// Attempts for each like and each download before moving on
pub const MAX_ATTEMPTS: u32 = 5;

/// Never walk further back than this many uploads pages per channel
const MAX_UPLOAD_PAGES: usize = 5;

/// What a run did, for the final log line and exit code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub liked: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl WatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

pub struct Watcher<'a> {
    client: &'a YouTubeClient,
    downloader: &'a Downloader,
    retry_delay: Duration,
}

impl<'a> Watcher<'a> {
    pub fn new(client: &'a YouTubeClient, downloader: &'a Downloader) -> Self {
        Self {
            client,
            downloader,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Pause between like/download attempts
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// One pass over every configured channel
    pub async fn search(
        &self,
        channels: &ChannelStore,
        hours: u64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<WatchSummary> {
        let mut summary = WatchSummary::default();

        if channels.channels().is_empty() {
            tracing::warn!("No channels configured, add one with `config add <name>`");
            return Ok(summary);
        }

        for (channel_id, entry) in channels.channels() {
            if cancel.is_cancelled() {
                tracing::info!("Cancelled, stopping before {}", entry.channel_name);
                break;
            }

            tracing::info!("Checking {} for uploads in the last {}h", entry.channel_name, hours);
            let candidates = match self.new_uploads(channel_id, hours, now).await {
                Ok(videos) => videos,
                Err(e) => {
                    tracing::error!("Failed to list uploads for {}: {:#}", entry.channel_name, e);
                    summary.failed += 1;
                    continue;
                }
            };

            if candidates.is_empty() {
                tracing::info!("No new videos for {}", entry.channel_name);
                continue;
            }

            for video in candidates {
                if cancel.is_cancelled() {
                    break;
                }
                if !title_matches(&video.title, entry.titles()) {
                    tracing::info!("Skipping {:?}: title does not match any filter", video.title);
                    summary.skipped += 1;
                    continue;
                }
                self.process(&video.id, &mut summary).await;
            }
        }

        Ok(summary)
    }

    /// Uploads newer than `hours`, newest first
    async fn new_uploads(&self, channel_id: &str, hours: u64, now: DateTime<Utc>) -> Result<Vec<Video>> {
        let playlist_id = self
            .client
            .uploads_playlist_id(channel_id)
            .await
            .context("Unable to find the channel's uploads playlist")?;

        let mut fresh = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_UPLOAD_PAGES {
            let page = self
                .client
                .playlist_videos(&playlist_id, page_token.as_deref())
                .await
                .context("Unable to get videos from the uploads playlist")?;

            let before = fresh.len();
            let page_len = page.videos.len();
            fresh.extend(
                page.videos
                    .into_iter()
                    .filter(|v| is_new_release(v.published_at, hours, now)),
            );

            // A page with anything old means we have reached the window's edge
            if fresh.len() - before < page_len {
                break;
            }
            match page.next_page {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(fresh)
    }

    /// Like and download specific videos by URL or ID
    pub async fn videos(&self, targets: &[String], cancel: &CancellationToken) -> WatchSummary {
        let mut summary = WatchSummary::default();
        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            match parse_video_id(target) {
                Some(id) => self.process(&id, &mut summary).await,
                None => {
                    tracing::error!("{:?} is not a YouTube video URL or ID", target);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Like and download every video in the given playlists
    pub async fn playlists(&self, targets: &[String], cancel: &CancellationToken) -> WatchSummary {
        let mut summary = WatchSummary::default();
        for target in targets {
            let Some(playlist_id) = parse_playlist_id(target) else {
                tracing::error!("{:?} is not a YouTube playlist URL or ID", target);
                summary.failed += 1;
                continue;
            };

            let videos = match self.client.all_playlist_videos(&playlist_id).await {
                Ok(videos) => videos,
                Err(e) => {
                    tracing::error!("Failed to list playlist {}: {}", playlist_id, e);
                    summary.failed += 1;
                    continue;
                }
            };

            tracing::info!("Playlist {} has {} videos", playlist_id, videos.len());
            for video in videos {
                if cancel.is_cancelled() {
                    return summary;
                }
                self.process(&video.id, &mut summary).await;
            }
        }
        summary
    }

    /// Like then download one video, each with bounded retries.
    /// A failed like does not prevent the download.
    async fn process(&self, video_id: &str, summary: &mut WatchSummary) {
        let mut liked = false;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.like_video(video_id).await {
                Ok(()) => {
                    liked = true;
                    break;
                }
                Err(e) => {
                    tracing::error!("Unable to like {} (attempt {}/{}): {}", video_id, attempt, MAX_ATTEMPTS, e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        if liked {
            tracing::info!("Liked {}", video_id);
            summary.liked += 1;
        } else {
            tracing::error!("Giving up on liking {} after {} attempts", video_id, MAX_ATTEMPTS);
        }

        let mut downloaded = false;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.downloader.download(video_id).await {
                Ok(true) => {
                    downloaded = true;
                    break;
                }
                Ok(false) => {
                    tracing::error!("Unable to download {} (attempt {}/{})", video_id, attempt, MAX_ATTEMPTS)
                }
                Err(e) => {
                    tracing::error!("Unable to download {} (attempt {}/{}): {:#}", video_id, attempt, MAX_ATTEMPTS, e)
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        if downloaded {
            summary.downloaded += 1;
        } else {
            tracing::error!(
                "Giving up on downloading {} after {} attempts, download it manually: https://www.youtube.com/watch?v={}",
                video_id,
                MAX_ATTEMPTS,
                video_id
            );
        }

        if !liked || !downloaded {
            summary.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AuthManager, ClientCredential, CredentialStore, ManualClock, OAuthEndpoints, PollPolicy,
        TokenRecord,
    };
    use crate::error::AuthError;
    use chrono::TimeZone;
    use mockito::Matcher;
    use std::sync::{Arc, Mutex};

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

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 12, 12, 0, 0).unwrap()
    }

    fn client_for(server: &mockito::ServerGuard) -> YouTubeClient {
        let store = Arc::new(FixedStore(Mutex::new(Some(TokenRecord {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: now() + chrono::Duration::hours(1),
        }))));
        let auth = AuthManager::new(
            store,
            OAuthEndpoints::new(server.url(), "scope"),
            0,
            PollPolicy::default(),
        )
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(now())));

        YouTubeClient::new(Arc::new(auth), server.url(), 5, 5, 0)
            .unwrap()
            .with_base_delay_ms(1)
    }

    fn true_downloader() -> Option<Downloader> {
        Downloader::new("/bin/true", "/tmp", "best", "%(title)s.%(ext)s").ok()
    }

    fn channels_with(dir: &tempfile::TempDir, yaml: &str) -> ChannelStore {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        ChannelStore::load(&path).unwrap()
    }

    #[tokio::test]
    async fn test_search_likes_only_new_matching_uploads() {
        let Some(downloader) = true_downloader() else { return };
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("id".into(), "UCodd".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"UCodd","contentDetails":{"relatedPlaylists":{"uploads":"UUodd"}}}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/youtube/v3/playlistItems")
            .match_query(Matcher::UrlEncoded("playlistId".into(), "UUodd".into()))
            .with_status(200)
            .with_body(
                r#"{"nextPageToken":"MORE","items":[
                    {"snippet":{"title":"Minecraft stream","publishedAt":"2025-01-12T11:00:00Z","resourceId":{"videoId":"mmmmmmmmmmm"}}},
                    {"snippet":{"title":"Dark Souls part 4","publishedAt":"2025-01-12T09:00:00Z","resourceId":{"videoId":"ddddddddddd"}}},
                    {"snippet":{"title":"Dark Souls part 3","publishedAt":"2025-01-10T09:00:00Z","resourceId":{"videoId":"ooooooooooo"}}}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let liked = server
            .mock("POST", "/youtube/v3/videos/rate")
            .match_query(Matcher::UrlEncoded("id".into(), "ddddddddddd".into()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let never = server
            .mock("POST", "/youtube/v3/videos/rate")
            .match_query(Matcher::Any)
            .with_status(204)
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let channels = channels_with(
            &dir,
            "channels:\n  UCodd:\n    channel_name: ChristopherOdd\n    channel_titles: [dark souls]\n",
        );
        let client = client_for(&server);
        let watcher = Watcher::new(&client, &downloader).with_retry_delay(Duration::ZERO);

        let summary = watcher
            .search(&channels, 24, now(), &CancellationToken::new())
            .await
            .unwrap();

        liked.assert_async().await;
        never.assert_async().await;
        assert_eq!(
            summary,
            WatchSummary {
                liked: 1,
                downloaded: 1,
                failed: 0,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_like_is_retried_five_times_then_download_still_runs() {
        let Some(downloader) = true_downloader() else { return };
        let mut server = mockito::Server::new_async().await;
        let rate = server
            .mock("POST", "/youtube/v3/videos/rate")
            .match_query(Matcher::Any)
            .with_status(400)
            .expect(MAX_ATTEMPTS as usize)
            .create_async()
            .await;

        let client = client_for(&server);
        let watcher = Watcher::new(&client, &downloader).with_retry_delay(Duration::ZERO);
        let summary = watcher
            .videos(
                &["https://youtu.be/dQw4w9WgXcQ".to_string(), "nope".to_string()],
                &CancellationToken::new(),
            )
            .await;

        rate.assert_async().await;
        assert_eq!(summary.liked, 0);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 2);
        assert!(!summary.is_clean());
    }

    #[tokio::test]
    async fn test_empty_configuration_does_nothing() {
        let Some(downloader) = true_downloader() else { return };
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let channels = channels_with(&dir, "");
        let client = client_for(&server);

        let summary = Watcher::new(&client, &downloader)
            .search(&channels, 24, now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, WatchSummary::default());
    }
}
