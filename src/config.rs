use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{OAuthEndpoints, PollPolicy, DEFAULT_AUTH_BASE_URL, DEFAULT_SCOPE};

/// Longest `search --hours` window accepted (about a century)
pub const MAX_SEARCH_HOURS: u64 = 24 * 365 * 100;

/// Largest TOKEN_REFRESH_THRESHOLD accepted, in seconds
pub const MAX_REFRESH_THRESHOLD_SECS: u64 = 24 * 60 * 60;

/// Default YouTube Data API host
pub const DEFAULT_API_BASE_URL: &str = "https://youtube.googleapis.com";

/// Like and download new uploads from configured YouTube channels
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Directory videos are saved to
    #[arg(short = 'o', long, env = "DOWNLOAD_PATH", default_value = "~/Videos", global = true)]
    pub download_path: String,

    /// OAuth client secrets downloaded from the Google Cloud console
    #[arg(long, env = "CLIENT_SECRETS_FILE", default_value = "client_secrets.json", global = true)]
    pub client_secrets: String,

    /// Where the access/refresh token record is kept
    #[arg(long, env = "TOKEN_FILE", default_value = "refresh_token.json", global = true)]
    pub token_file: String,

    /// YAML file listing the watched channels
    #[arg(long, env = "CHANNELS_FILE", default_value = "config.yaml", global = true)]
    pub channels_file: String,

    /// Path to the yt-dlp executable
    #[arg(long, env = "YTDLP_PATH", default_value = "/usr/local/bin/yt-dlp", global = true)]
    pub ytdlp: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the device authorization flow and store a fresh token
    Login,

    /// Check the stored credentials against the API
    Test,

    /// Like and download videos released by configured channels in the past N hours
    Search {
        /// Look-back window in hours
        #[arg(
            long,
            short = 's',
            default_value = "24",
            value_parser = clap::value_parser!(u64).range(1..=MAX_SEARCH_HOURS)
        )]
        hours: u64,
    },

    /// Like and download specific videos by URL or ID
    Video {
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Like and download every video in the given playlists
    Playlist {
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Manage the list of watched channels
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConfigAction {
    /// Add a channel by name (or by one of its videos)
    Add {
        /// Channel name as shown on YouTube
        name: String,

        /// Resolve the channel from a video URL or ID instead of searching
        #[arg(long)]
        from_video: Option<String>,

        /// Comma-separated title filters
        #[arg(long)]
        titles: Option<String>,
    },

    /// Show configured channels
    List {
        /// Only show this channel
        name: Option<String>,
    },

    /// Change a channel's title filters
    Update {
        name: String,

        /// Comma-separated title filters
        #[arg(long)]
        titles: String,

        /// Replace the filters instead of appending
        #[arg(long)]
        overwrite: bool,
    },

    /// Stop watching a channel
    Remove {
        name: String,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub command: Command,

    // Files
    pub client_secrets_file: PathBuf,
    pub token_file: PathBuf,
    pub channels_file: PathBuf,

    // OAuth
    pub auth_base_url: String,
    pub oauth_scope: String,
    pub token_refresh_threshold: u64,
    pub poll_backoff_factor: u32,
    pub poll_max_wait: u64,
    pub poll_max_attempts: Option<u32>,

    // YouTube API client
    pub api_base_url: String,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // Downloads
    pub ytdlp_path: PathBuf,
    pub download_path: PathBuf,
    pub video_format: String,
    pub video_output: String,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Ok(Self::from_args(args))
    }

    /// Build configuration from parsed arguments plus env-only settings
    pub fn from_args(args: CliArgs) -> Self {
        let log_level = if args.debug {
            "debug".to_string()
        } else {
            args.log_level
        };

        Config {
            command: args.command,

            client_secrets_file: expand_tilde(&args.client_secrets),
            token_file: expand_tilde(&args.token_file),
            channels_file: expand_tilde(&args.channels_file),

            auth_base_url: std::env::var("AUTH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_BASE_URL.to_string()),
            oauth_scope: std::env::var("OAUTH_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string()),
            token_refresh_threshold: env_or("TOKEN_REFRESH_THRESHOLD", 0),
            poll_backoff_factor: env_or("POLL_BACKOFF_FACTOR", crate::auth::DEFAULT_BACKOFF_FACTOR),
            poll_max_wait: env_or("POLL_MAX_WAIT", crate::auth::DEFAULT_MAX_WAIT.as_secs()),
            poll_max_attempts: std::env::var("POLL_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok()),

            api_base_url: std::env::var("API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 30),
            http_request_timeout: env_or("HTTP_REQUEST_TIMEOUT", 60),
            http_max_retries: env_or("HTTP_MAX_RETRIES", 3),

            ytdlp_path: expand_tilde(&args.ytdlp),
            download_path: expand_tilde(&args.download_path),
            video_format: std::env::var("VIDEO_FORMAT")
                .unwrap_or_else(|_| "bestvideo*+bestaudio/best".to_string()),
            video_output: std::env::var("VIDEO_OUTPUT")
                .unwrap_or_else(|_| "%(channel)s/%(title)s.%(ext)s".to_string()),

            log_level,
            log_format: args.log_format,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_backoff_factor < 2 {
            anyhow::bail!(
                "POLL_BACKOFF_FACTOR must be at least 2 (got {})",
                self.poll_backoff_factor
            );
        }

        if self.token_refresh_threshold > MAX_REFRESH_THRESHOLD_SECS {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD must be at most {} seconds (got {})",
                MAX_REFRESH_THRESHOLD_SECS,
                self.token_refresh_threshold
            );
        }

        if self.poll_max_wait == 0 {
            anyhow::bail!("POLL_MAX_WAIT must be greater than zero");
        }

        check_url(&self.auth_base_url).context("AUTH_BASE_URL is not a valid URL")?;
        check_url(&self.api_base_url).context("API_BASE_URL is not a valid URL")?;

        Ok(())
    }

    pub fn oauth_endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints::new(self.auth_base_url.clone(), self.oauth_scope.clone())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            backoff_factor: self.poll_backoff_factor,
            max_wait: Some(Duration::from_secs(self.poll_max_wait)),
            max_attempts: self.poll_max_attempts,
        }
    }

    /// Whether the command talks to the YouTube API at all
    pub fn needs_auth(&self) -> bool {
        !matches!(
            self.command,
            Command::Config {
                action: ConfigAction::List { .. } | ConfigAction::Remove { .. }
                    | ConfigAction::Update { .. }
            }
        )
    }
}

/// Scheme check only; reqwest reports anything subtler at request time
fn check_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        anyhow::bail!("expected an http(s) URL, got {:?}", url)
    }
}

/// Parse an env var, falling back to `default` when unset or malformed
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_relative_path() {
        let path = expand_tilde("relative/path");
        assert_eq!(path, PathBuf::from("relative/path"));
    }

    #[test]
    fn test_parse_search_command() {
        let args = parse(&["youtube-like-dl", "search", "--hours", "12", "--debug"]);
        assert_eq!(args.command, Command::Search { hours: 12 });
        assert!(args.debug);

        let config = Config::from_args(args);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_search_hours_out_of_range_is_rejected() {
        assert!(CliArgs::try_parse_from(["youtube-like-dl", "search", "--hours", "0"]).is_err());
        assert!(CliArgs::try_parse_from([
            "youtube-like-dl",
            "search",
            "--hours",
            "3000000000000000"
        ])
        .is_err());
        assert!(CliArgs::try_parse_from([
            "youtube-like-dl",
            "search",
            "--hours",
            "18446744073709551615"
        ])
        .is_err());

        let args = parse(&["youtube-like-dl", "search", "--hours", &MAX_SEARCH_HOURS.to_string()]);
        assert_eq!(args.command, Command::Search { hours: MAX_SEARCH_HOURS });
    }

    #[test]
    fn test_video_requires_target() {
        assert!(CliArgs::try_parse_from(["youtube-like-dl", "video"]).is_err());
        let args = parse(&["youtube-like-dl", "video", "dQw4w9WgXcQ", "-o", "/tmp/videos"]);
        assert_eq!(
            args.command,
            Command::Video {
                targets: vec!["dQw4w9WgXcQ".to_string()]
            }
        );
        assert_eq!(args.download_path, "/tmp/videos");
    }

    #[test]
    fn test_parse_config_actions() {
        let args = parse(&[
            "youtube-like-dl",
            "config",
            "update",
            "ChristopherOdd",
            "--titles",
            "Dark Souls, Elden Ring",
            "--overwrite",
        ]);
        assert_eq!(
            args.command,
            Command::Config {
                action: ConfigAction::Update {
                    name: "ChristopherOdd".to_string(),
                    titles: "Dark Souls, Elden Ring".to_string(),
                    overwrite: true,
                }
            }
        );
    }

    #[test]
    fn test_needs_auth() {
        let list = Config::from_args(parse(&["youtube-like-dl", "config", "list"]));
        assert!(!list.needs_auth());

        let add = Config::from_args(parse(&["youtube-like-dl", "config", "add", "Somebody"]));
        assert!(add.needs_auth());

        let search = Config::from_args(parse(&["youtube-like-dl", "search"]));
        assert!(search.needs_auth());
    }

    #[test]
    fn test_validate_rejects_small_backoff_factor() {
        let mut config = Config::from_args(parse(&["youtube-like-dl", "login"]));
        config.poll_backoff_factor = 1;
        assert!(config.validate().is_err());

        config.poll_backoff_factor = 3;
        config.auth_base_url = "https://oauth2.googleapis.com".to_string();
        config.api_base_url = "https://youtube.googleapis.com".to_string();
        config.poll_max_wait = 900;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds_refresh_threshold() {
        let mut config = Config::from_args(parse(&["youtube-like-dl", "login"]));
        config.poll_backoff_factor = 2;
        config.poll_max_wait = 900;
        config.auth_base_url = "https://oauth2.googleapis.com".to_string();
        config.api_base_url = "https://youtube.googleapis.com".to_string();

        config.token_refresh_threshold = MAX_REFRESH_THRESHOLD_SECS;
        assert!(config.validate().is_ok());

        config.token_refresh_threshold = 10_000_000_000_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_policy_from_config() {
        let mut config = Config::from_args(parse(&["youtube-like-dl", "login"]));
        config.poll_backoff_factor = 3;
        config.poll_max_wait = 120;
        config.poll_max_attempts = Some(10);

        let policy = config.poll_policy();
        assert_eq!(policy.backoff_factor, 3);
        assert_eq!(policy.max_wait, Some(Duration::from_secs(120)));
        assert_eq!(policy.max_attempts, Some(10));
    }
}
