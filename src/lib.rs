// youtube-like-dl - Library root for testing

pub mod auth;
pub mod channels;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http_client;
pub mod matcher;
pub mod models;
pub mod watch;
