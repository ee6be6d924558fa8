// Watched channel configuration (YAML)

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::auth::write_atomic;

/// On-disk layout: `channels: { <channel id>: { channel_name, channel_titles } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelsFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub channels: BTreeMap<String, ChannelEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub channel_name: String,
    /// Title filters; `None` matches every upload
    #[serde(default, deserialize_with = "one_or_many")]
    pub channel_titles: Option<Vec<String>>,
}

impl ChannelEntry {
    pub fn titles(&self) -> &[String] {
        self.channel_titles.as_deref().unwrap_or(&[])
    }
}

/// How `update_channel` combines titles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Append,
    Overwrite,
}

/// Channel configuration bound to its file
#[derive(Debug)]
pub struct ChannelStore {
    path: PathBuf,
    file: ChannelsFile,
}

impl ChannelStore {
    /// Load the channels file; a missing file is an empty configuration
    pub fn load(path: &Path) -> Result<Self> {
        let file = match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => ChannelsFile::default(),
            Ok(raw) => serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse channels file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No channels file at {}, starting empty", path.display());
                ChannelsFile::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read channels file: {}", path.display()))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn channels(&self) -> &BTreeMap<String, ChannelEntry> {
        &self.file.channels
    }

    /// Find a channel id by display name, ignoring case
    pub fn get_channel(&self, name: &str) -> Option<(&str, &ChannelEntry)> {
        let needle = name.trim().to_lowercase();
        self.file
            .channels
            .iter()
            .find(|(_, entry)| entry.channel_name.to_lowercase() == needle)
            .map(|(id, entry)| (id.as_str(), entry))
    }

    /// Insert or replace a channel. Returns false if it was already configured.
    pub fn add_channel(&mut self, id: &str, name: &str, titles: Vec<String>) -> bool {
        let entry = ChannelEntry {
            channel_name: name.to_string(),
            channel_titles: if titles.is_empty() { None } else { Some(titles) },
        };
        self.file.channels.insert(id.to_string(), entry).is_none()
    }

    pub fn update_channel(&mut self, id: &str, titles: Vec<String>, mode: UpdateMode) -> Result<()> {
        let entry = self
            .file
            .channels
            .get_mut(id)
            .with_context(|| format!("Channel {} is not configured", id))?;

        entry.channel_titles = match (mode, entry.channel_titles.take()) {
            (UpdateMode::Append, Some(mut existing)) => {
                for title in titles {
                    if !existing.contains(&title) {
                        existing.push(title);
                    }
                }
                Some(existing)
            }
            (UpdateMode::Append, None) | (UpdateMode::Overwrite, _) => {
                if titles.is_empty() {
                    None
                } else {
                    Some(titles)
                }
            }
        };
        Ok(())
    }

    pub fn remove_channel(&mut self, id: &str) -> Option<ChannelEntry> {
        self.file.channels.remove(id)
    }

    /// YAML listing of one channel (by name) or the whole file
    pub fn list_channels(&self, name: Option<&str>) -> Result<Option<String>> {
        match name {
            Some(name) => match self.get_channel(name) {
                Some((_, entry)) => Ok(Some(serde_yaml::to_string(entry)?)),
                None => Ok(None),
            },
            None => Ok(Some(serde_yaml::to_string(&self.file)?)),
        }
    }

    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.file).context("Failed to serialize channels")?;
        write_atomic(&self.path, yaml.as_bytes())
            .with_context(|| format!("Failed to write channels file: {}", self.path.display()))?;
        tracing::debug!("Saved {} channels to {}", self.file.channels.len(), self.path.display());
        Ok(())
    }
}

/// Split a comma-separated filter list, trimming blanks
pub fn split_titles(titles: &str) -> Vec<String> {
    titles
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, ChannelEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, ChannelEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Older files stored a single filter as a plain string
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(title)) => Some(vec![title]),
        Some(OneOrMany::Many(titles)) if titles.is_empty() => None,
        Some(OneOrMany::Many(titles)) => Some(titles),
    })
}
