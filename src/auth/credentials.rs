// Credential store: client secrets and the persisted token record

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::AuthError;

use super::types::{ClientCredential, ClientSecretsFile, TokenRecord};

/// Durable storage for the OAuth client identity and the active token record
pub trait CredentialStore: Send + Sync {
    fn load_client_credential(&self) -> Result<ClientCredential, AuthError>;

    fn load_token_record(&self) -> Option<TokenRecord>;

    fn save_token_record(&self, record: &TokenRecord) -> Result<(), AuthError>;
}

/// JSON files on local disk
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    client_secrets_file: PathBuf,
    token_file: PathBuf,
}

impl FileCredentialStore {
    pub fn new(client_secrets_file: PathBuf, token_file: PathBuf) -> Self {
        Self {
            client_secrets_file,
            token_file,
        }
    }

    pub fn token_file(&self) -> &Path {
        &self.token_file
    }
}

impl CredentialStore for FileCredentialStore {
    fn load_client_credential(&self) -> Result<ClientCredential, AuthError> {
        let path = &self.client_secrets_file;
        let missing = |reason: String| AuthError::ConfigMissing {
            path: path.clone(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| missing(e.to_string()))?;
        let file: ClientSecretsFile = serde_json::from_str(&raw)
            .map_err(|e| missing(format!("not a client secrets file: {}", e)))?;

        let credential = ClientCredential::from(file);
        if credential.client_id.is_empty() || credential.client_secret.is_empty() {
            return Err(missing("client_id and client_secret must not be empty".to_string()));
        }

        tracing::debug!("Loaded client credential from {}", path.display());
        Ok(credential)
    }

    fn load_token_record(&self) -> Option<TokenRecord> {
        let path = &self.token_file;
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No token record at {}, first login required", path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Unable to read token record {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<TokenRecord>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable token record {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    fn save_token_record(&self, record: &TokenRecord) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| AuthError::Persistence(e.to_string()))?;
        write_atomic(&self.token_file, &json).map_err(|e| {
            AuthError::Persistence(format!("{}: {}", self.token_file.display(), e))
        })?;
        tracing::debug!("Token record saved to {}", self.token_file.display());
        Ok(())
    }
}

/// Write `contents` next to `path` and rename it into place, so a crash
/// leaves either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
