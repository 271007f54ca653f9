use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::bundle::TokenBundle;
use super::storage::SecureStorage;

/// Storage key for the serialized token bundle
const BUNDLE_KEY: &str = "token_bundle";

/// Storage key for the last-seen application version
const VERSION_KEY: &str = "app_version";

/// Failure against persistent storage. Logged inside [`TokenStore`] and
/// never returned from its public methods.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0:#}")]
    Backend(#[from] anyhow::Error),

    #[error("Stored token bundle is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable copy of the current token bundle and version marker.
///
/// Every operation is best effort. Failures are logged and reported as
/// `false` / `None`; the in-memory session stays authoritative for the
/// running process.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SecureStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Persist `bundle`, or delete the stored bundle when `None`.
    pub async fn save(&self, bundle: Option<&TokenBundle>) -> bool {
        let result = match bundle {
            Some(bundle) => match serde_json::to_string(bundle) {
                Ok(encoded) => self.write(BUNDLE_KEY, Some(encoded)).await,
                Err(e) => Err(e.into()),
            },
            None => self.write(BUNDLE_KEY, None).await,
        };
        match result {
            Ok(()) => {
                debug!(deleted = bundle.is_none(), "Token bundle persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist token bundle");
                false
            }
        }
    }

    /// Load the stored bundle. Missing, corrupt or unreadable data all
    /// come back as `None`.
    pub async fn load(&self) -> Option<TokenBundle> {
        let raw = match self.read(BUNDLE_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read token bundle");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!(error = %StorageError::from(e), "Discarding unreadable token bundle");
                None
            }
        }
    }

    pub async fn save_version_marker(&self, version: &str) -> bool {
        match self.write(VERSION_KEY, Some(version.to_string())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist version marker");
                false
            }
        }
    }

    pub async fn load_version_marker(&self) -> Option<String> {
        match self.read(VERSION_KEY).await {
            Ok(marker) => marker,
            Err(e) => {
                warn!(error = %e, "Failed to read version marker");
                None
            }
        }
    }

    async fn read(&self, key: &'static str) -> Result<Option<String>, StorageError> {
        let storage = Arc::clone(&self.storage);
        let value = tokio::task::spawn_blocking(move || storage.get(key)).await??;
        Ok(value)
    }

    async fn write(&self, key: &'static str, value: Option<String>) -> Result<(), StorageError> {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || match value {
            Some(value) => storage.set(key, &value),
            None => storage.delete(key),
        })
        .await??;
        Ok(())
    }
}
