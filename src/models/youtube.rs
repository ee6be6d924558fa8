use chrono::{DateTime, Utc};
use serde::Deserialize;

// ==================================================================================================
// Wire Models (YouTube Data API v3)
// ==================================================================================================

/// Generic `*ListResponse` envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: SearchResultId,
    pub snippet: TitleSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultId {
    pub kind: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleSnippet {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<TitleSnippet>,
    #[serde(default)]
    pub content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedPlaylists {
    #[serde(default)]
    pub uploads: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    pub snippet: VideoSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub snippet: PlaylistItemSnippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    #[serde(default)]
    pub video_id: Option<String>,
}

// ==================================================================================================
// Domain Models
// ==================================================================================================

/// A channel as the rest of the tool sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub title: String,
}

/// A video candidate for liking/downloading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
}

impl Video {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// One page of a playlist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPage {
    pub videos: Vec<Video>,
    pub next_page: Option<String>,
}

impl From<ListResponse<PlaylistItem>> for VideoPage {
    fn from(list: ListResponse<PlaylistItem>) -> Self {
        let videos = list
            .items
            .into_iter()
            .filter_map(|item| {
                // Deleted or private entries have no video id
                let id = item.snippet.resource_id.video_id?;
                Some(Video {
                    id,
                    title: item.snippet.title,
                    published_at: item.snippet.published_at,
                })
            })
            .collect();

        VideoPage {
            videos,
            next_page: list.next_page_token,
        }
    }
}

impl From<VideoResource> for Video {
    fn from(resource: VideoResource) -> Self {
        Video {
            id: resource.id,
            title: resource.snippet.title,
            published_at: resource.snippet.published_at,
        }
    }
}
