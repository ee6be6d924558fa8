// Data models for the YouTube Data API

pub mod youtube;

pub use youtube::{ChannelRef, Video, VideoPage};
