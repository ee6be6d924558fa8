use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod auth;
mod channels;
mod config;
mod downloader;
mod error;
mod http_client;
mod matcher;
mod models;
mod watch;

use config::{Command, Config, ConfigAction, LogFormat};
use error::AuthError;

#[tokio::main]
async fn main() {
    // Load configuration first (for log level)
    let config = match Config::load().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };

    init_logging(&config);
    tracing::debug!("Running {:?}", config.command);

    // Ctrl+C / SIGTERM cancel in-flight polling and stop between videos
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    match run(config, &cancel).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{:#}", e);
            if let Some(AuthError::ConfigMissing { .. }) = e.downcast_ref::<AuthError>() {
                tracing::error!(
                    "Download OAuth client secrets (type \"TVs and Limited Input devices\") from the Google Cloud console and point CLIENT_SECRETS_FILE at them"
                );
            }
            std::process::exit(1);
        }
    }
}

/// Initialize logging with the configured level; RUST_LOG wins when set
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Returns Ok(false) when the command finished but something along the way failed
async fn run(config: Config, cancel: &CancellationToken) -> Result<bool> {
    if !config.needs_auth() {
        if let Command::Config { action } = &config.command {
            return manage_channels(&config, action, None).await;
        }
    }

    let store = Arc::new(auth::FileCredentialStore::new(
        config.client_secrets_file.clone(),
        config.token_file.clone(),
    ));
    let auth_manager = Arc::new(auth::AuthManager::new(
        store,
        config.oauth_endpoints(),
        config.token_refresh_threshold,
        config.poll_policy(),
    )?);

    if config.command == Command::Login {
        let record = auth_manager.login(cancel).await?;
        tracing::info!(
            "Login complete (token: {}), valid until {}",
            auth::mask_token(&record.access_token),
            record.expires_at.to_rfc3339()
        );
        return Ok(true);
    }

    let token = auth_manager.authenticate(cancel).await?;
    tracing::info!("Authentication successful (token: {})", auth::mask_token(&token));

    let client = http_client::YouTubeClient::new(
        auth_manager.clone(),
        config.api_base_url.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
        config.http_max_retries,
    )?;

    match &config.command {
        Command::Login => Ok(true),

        Command::Test => {
            let channel = client.test_api().await.context("API test failed")?;
            println!("API access works. Authorized as {} ({})", channel.title, channel.id);
            Ok(true)
        }

        Command::Config { action } => manage_channels(&config, action, Some(&client)).await,

        Command::Search { hours } => {
            let downloader = make_downloader(&config)?;
            let channels = channels::ChannelStore::load(&config.channels_file)?;
            let summary = watch::Watcher::new(&client, &downloader)
                .search(&channels, *hours, chrono::Utc::now(), cancel)
                .await?;
            report(&summary);
            Ok(summary.is_clean())
        }

        Command::Video { targets } => {
            let downloader = make_downloader(&config)?;
            let summary = watch::Watcher::new(&client, &downloader)
                .videos(targets, cancel)
                .await;
            report(&summary);
            Ok(summary.is_clean())
        }

        Command::Playlist { targets } => {
            let downloader = make_downloader(&config)?;
            let summary = watch::Watcher::new(&client, &downloader)
                .playlists(targets, cancel)
                .await;
            report(&summary);
            Ok(summary.is_clean())
        }
    }
}

fn make_downloader(config: &Config) -> Result<downloader::Downloader> {
    std::fs::create_dir_all(&config.download_path).with_context(|| {
        format!("Failed to create download directory: {}", config.download_path.display())
    })?;

    downloader::Downloader::new(
        config.ytdlp_path.clone(),
        config.download_path.clone(),
        config.video_format.clone(),
        config.video_output.clone(),
    )
}

fn report(summary: &watch::WatchSummary) {
    tracing::info!(
        liked = summary.liked,
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Finished"
    );
}

/// `config` subcommands. Only `add` needs the API client.
async fn manage_channels(
    config: &Config,
    action: &ConfigAction,
    client: Option<&http_client::YouTubeClient>,
) -> Result<bool> {
    let mut store = channels::ChannelStore::load(&config.channels_file)?;

    match action {
        ConfigAction::List { name } => match store.list_channels(name.as_deref())? {
            Some(yaml) => print!("{}", yaml),
            None => {
                println!("No channel named {:?} is configured", name.as_deref().unwrap_or_default());
                return Ok(false);
            }
        },

        ConfigAction::Add {
            name,
            from_video,
            titles,
        } => {
            let client = client.context("Adding a channel requires API access")?;
            let channel = match from_video {
                Some(video) => {
                    let video_id = matcher::parse_video_id(video)
                        .with_context(|| format!("{:?} is not a YouTube video URL or ID", video))?;
                    client.channel_from_video(&video_id).await?
                }
                None => client.search_channel(name).await?,
            };

            if store.channels().contains_key(&channel.id) {
                let overwrite = Confirm::new()
                    .with_prompt(format!("{} is already configured. Overwrite it?", channel.title))
                    .default(false)
                    .interact()
                    .context("Failed to read confirmation")?;
                if !overwrite {
                    println!("Left {} unchanged", channel.title);
                    return Ok(true);
                }
            }

            let titles = titles.as_deref().map(channels::split_titles).unwrap_or_default();
            store.add_channel(&channel.id, &channel.title, titles);
            store.save()?;
            println!("Added {} ({})", channel.title, channel.id);
        }

        ConfigAction::Update {
            name,
            titles,
            overwrite,
        } => {
            let id = match store.get_channel(name) {
                Some((id, _)) => id.to_string(),
                None => anyhow::bail!("No channel named {:?} is configured", name),
            };
            let mode = if *overwrite {
                channels::UpdateMode::Overwrite
            } else {
                channels::UpdateMode::Append
            };
            store.update_channel(&id, channels::split_titles(titles), mode)?;
            store.save()?;
            println!("Updated {}", name);
        }

        ConfigAction::Remove { name, yes } => {
            let (id, channel_name) = match store.get_channel(name) {
                Some((id, entry)) => (id.to_string(), entry.channel_name.clone()),
                None => anyhow::bail!("No channel named {:?} is configured", name),
            };

            if !*yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Stop watching {}?", channel_name))
                    .default(false)
                    .interact()
                    .context("Failed to read confirmation")?;
                if !confirmed {
                    return Ok(true);
                }
            }

            store.remove_channel(&id);
            store.save()?;
            println!("Removed {}", channel_name);
        }
    }

    Ok(true)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, cancelling...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling...");
        },
    }
}
