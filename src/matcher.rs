// Video selection: release window, title filters, and ID extraction

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})")
        .expect("video id pattern is valid")
});

static PLAYLIST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]list=([A-Za-z0-9_-]+)").expect("playlist id pattern is valid"));

static BARE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("bare id pattern is valid"));

/// True if the video was published less than `hours` ago.
/// A window too large for a timestamp covers every upload.
pub fn is_new_release(published_at: DateTime<Utc>, hours: u64, now: DateTime<Utc>) -> bool {
    match i64::try_from(hours).ok().and_then(Duration::try_hours) {
        Some(window) => now - published_at < window,
        None => true,
    }
}

/// Case-insensitive substring match against any filter; no filters match everything
pub fn title_matches(title: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let title = title.to_lowercase();
    let matched = filters
        .iter()
        .find(|filter| title.contains(&filter.to_lowercase()));

    match matched {
        Some(filter) => {
            tracing::debug!("Title {:?} matches filter {:?}", title, filter);
            true
        }
        None => {
            tracing::debug!("Title {:?} matches none of {:?}", title, filters);
            false
        }
    }
}

/// Video ID from a bare ID or any of the common YouTube URL shapes
pub fn parse_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(caps) = VIDEO_ID_RE.captures(input) {
        return Some(caps[1].to_string());
    }
    (input.len() == 11 && BARE_ID_RE.is_match(input)).then(|| input.to_string())
}

/// Playlist ID from a bare ID or a URL carrying `list=`
pub fn parse_playlist_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(caps) = PLAYLIST_ID_RE.captures(input) {
        return Some(caps[1].to_string());
    }
    (!input.is_empty() && !input.contains('/') && BARE_ID_RE.is_match(input))
        .then(|| input.to_string())
}
