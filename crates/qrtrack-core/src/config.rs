//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! identity provider settings, the backend base URL, and where session
//! secrets are stored. Environment variables override file values.
//!
//! Configuration is stored at `~/.config/qrtrack/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{
    EncryptedFileStorage, KeyringStorage, MemoryStorage, OidcConfig, SecureStorage,
    SessionFileStorage,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "qrtrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the cache directory for plain session files
const SESSION_DIR: &str = "session";

/// Subdirectory of the cache directory for encrypted session files
const SECRETS_DIR: &str = "secrets";

const DEFAULT_REDIRECT_URI: &str = "qrtrack://auth/callback";

/// Where session secrets are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Owner-only files in the cache directory
    #[default]
    File,
    /// OS keychain; requires the `keyring-native` feature
    Keyring,
    EncryptedFile,
    /// Nothing persists; every run starts signed out
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "session_file" | "session-file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            "encrypted_file" | "encrypted-file" => Ok(StorageBackend::EncryptedFile),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OIDC issuer; the discovery document lives under it
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: String,
    pub logout_uri: Option<String>,
    /// Overrides the default `openid profile email offline_access`
    pub scopes: Option<Vec<String>>,
    pub api_base_url: Option<String>,
    pub storage: StorageBackend,
    /// Email of the last signed-in user, for display before sign-in
    pub last_identity: Option<String>,
    /// Only ever read from the environment
    #[serde(skip)]
    pub storage_passphrase: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer: None,
            client_id: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            logout_uri: None,
            scopes: None,
            api_base_url: None,
            storage: StorageBackend::default(),
            last_identity: None,
            storage_passphrase: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `QRTRACK_*` overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("QRTRACK_ISSUER") {
            self.issuer = Some(v);
        }
        if let Some(v) = get("QRTRACK_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = get("QRTRACK_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Some(v) = get("QRTRACK_LOGOUT_URI") {
            self.logout_uri = Some(v);
        }
        if let Some(v) = get("QRTRACK_API_BASE_URL") {
            self.api_base_url = Some(v);
        }
        if let Some(v) = get("QRTRACK_STORAGE") {
            self.storage = v.parse()?;
        }
        if let Some(v) = get("QRTRACK_STORAGE_PASSPHRASE") {
            self.storage_passphrase = Some(v);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Identity provider settings, validated.
    pub fn oidc(&self) -> Result<OidcConfig> {
        let issuer = self
            .issuer
            .as_deref()
            .ok_or_else(|| anyhow!("No identity provider configured (set QRTRACK_ISSUER)"))?;
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| anyhow!("No client ID configured (set QRTRACK_CLIENT_ID)"))?;

        let issuer = Url::parse(issuer).context("Invalid issuer URL")?;
        let redirect_uri = Url::parse(&self.redirect_uri).context("Invalid redirect URI")?;

        let mut oidc = OidcConfig::new(issuer, client_id, redirect_uri);
        if let Some(logout_uri) = &self.logout_uri {
            oidc = oidc.with_logout_uri(Url::parse(logout_uri).context("Invalid logout URI")?);
        }
        if let Some(scopes) = &self.scopes {
            oidc = oidc.with_scopes(scopes.clone());
        }
        Ok(oidc)
    }

    pub fn api_base_url(&self) -> Result<Url> {
        let raw = self
            .api_base_url
            .as_deref()
            .ok_or_else(|| anyhow!("No API base URL configured (set QRTRACK_API_BASE_URL)"))?;
        Url::parse(raw).context("Invalid API base URL")
    }

    /// Open the configured secure storage backend.
    pub fn open_storage(&self) -> Result<Arc<dyn SecureStorage>> {
        self.open_storage_in(&self.cache_dir()?)
    }

    /// Open the configured backend with file-based storage under `base`.
    pub fn open_storage_in(&self, base: &Path) -> Result<Arc<dyn SecureStorage>> {
        match self.storage {
            StorageBackend::File => {
                let dir = base.join(SESSION_DIR);
                Ok(Arc::new(SessionFileStorage::new(dir)?))
            }
            StorageBackend::Keyring => {
                if !cfg!(feature = "keyring-native") {
                    bail!("Keychain storage needs a build with the keyring-native feature");
                }
                Ok(Arc::new(KeyringStorage::new()))
            }
            StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageBackend::EncryptedFile => {
                let Some(passphrase) = self.storage_passphrase.as_deref() else {
                    bail!("Encrypted file storage needs QRTRACK_STORAGE_PASSPHRASE");
                };
                let dir = base.join(SECRETS_DIR);
                Ok(Arc::new(EncryptedFileStorage::new(dir, passphrase)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::auth::{TokenBundle, TokenStore};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(config.storage, StorageBackend::File);
        assert!(config.oidc().is_err());
        assert!(config.api_base_url().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("QRTRACK_ISSUER", "https://id.example.com"),
                ("QRTRACK_CLIENT_ID", "mobile"),
                ("QRTRACK_LOGOUT_URI", "qrtrack://auth/logout"),
                ("QRTRACK_STORAGE", "encrypted-file"),
                ("QRTRACK_API_BASE_URL", ""),
            ]))
            .unwrap();

        assert_eq!(config.storage, StorageBackend::EncryptedFile);
        // Empty values do not override
        assert!(config.api_base_url.is_none());

        let oidc = config.oidc().unwrap();
        assert_eq!(oidc.client_id, "mobile");
        assert_eq!(oidc.logout_uri.unwrap().as_str(), "qrtrack://auth/logout");
    }

    #[test]
    fn test_unknown_storage_backend_is_error() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(env(&[("QRTRACK_STORAGE", "floppy")]))
            .is_err());
    }

    #[test]
    fn test_save_and_load_round_trip_skips_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config {
            issuer: Some("https://id.example.com".to_string()),
            scopes: Some(vec!["openid".to_string()]),
            storage: StorageBackend::Memory,
            storage_passphrase: Some("hunter2".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"storage\": \"memory\""));
        assert!(!raw.contains("hunter2"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.issuer, config.issuer);
        assert_eq!(loaded.storage, StorageBackend::Memory);
        assert!(loaded.storage_passphrase.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"client_id":"abc"}"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("abc"));
        assert_eq!(loaded.redirect_uri, DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn test_encrypted_storage_requires_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: StorageBackend::EncryptedFile,
            ..Default::default()
        };
        assert!(config.open_storage_in(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_default_storage_persists_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let bundle = TokenBundle {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_in_seconds: Some(3600),
            issued_at_epoch_millis: Some(1_700_000_000_000),
            ..Default::default()
        };

        let store = TokenStore::new(config.open_storage_in(dir.path()).unwrap());
        assert!(store.save(Some(&bundle)).await);
        assert!(store.save_version_marker("1.0.0").await);

        let next_run = TokenStore::new(config.open_storage_in(dir.path()).unwrap());
        assert_eq!(next_run.load().await, Some(bundle));
        assert_eq!(next_run.load_version_marker().await.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_storage_backend_names() {
        assert_eq!("file".parse::<StorageBackend>().unwrap(), StorageBackend::File);
        assert_eq!(
            "encrypted_file".parse::<StorageBackend>().unwrap(),
            StorageBackend::EncryptedFile
        );
        assert_eq!("Keyring".parse::<StorageBackend>().unwrap(), StorageBackend::Keyring);
    }

    #[cfg(not(feature = "keyring-native"))]
    #[test]
    fn test_keyring_without_native_backend_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: StorageBackend::Keyring,
            ..Default::default()
        };
        assert!(config.open_storage_in(dir.path()).is_err());
    }
}
