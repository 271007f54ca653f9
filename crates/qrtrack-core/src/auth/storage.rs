//! Secure key/value storage backends for persisted session data.
//!
//! Values are opaque strings; serialization is the caller's concern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Blocking key/value storage for secrets.
///
/// Implementations may block (keychain daemons, disk); callers on the async
/// runtime go through [`TokenStore`](super::TokenStore), which moves each
/// call onto the blocking pool.
pub trait SecureStorage: Send + Sync + 'static {
    /// Read a value. Missing keys are `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-process storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    operations: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, simulating a broken keychain.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of get/set/delete calls made so far.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Read a value without counting it as an operation.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        self.values
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))
    }
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Path of the file holding `key`. Keys are restricted to a safe charset
/// so they can never name a file outside `dir`.
fn key_path(dir: &Path, key: &str, extension: &str) -> Result<PathBuf> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        bail!("Invalid storage key: {:?}", key);
    }
    Ok(dir.join(format!("{}.{}", key, extension)))
}

/// Owner-only write through a temp file and rename, so a crash never
/// leaves a half-written value.
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, data)
        .with_context(|| format!("Failed to write storage file {}", tmp.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace storage file {}", path.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

/// Plain session files in the cache directory, one per key, readable only
/// by the owner. The default backend: it works everywhere without a
/// keychain daemon or passphrase.
pub struct SessionFileStorage {
    dir: PathBuf,
}

impl SessionFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SecureStorage for SessionFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = key_path(&self.dir, key, "json")?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read session file for {}", key)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        write_private(&key_path(&self.dir, key, "json")?, value.as_bytes())
    }

    fn delete(&self, key: &str) -> Result<()> {
        remove_if_present(&key_path(&self.dir, key, "json")?)
    }
}

/// File-backed storage for platforms without a usable keychain.
///
/// Each key is one file holding `salt || nonce || ciphertext`. The
/// ChaCha20-Poly1305 key is derived from the passphrase with Argon2id and
/// the file's own salt, so rewriting a value also rotates its key.
pub struct EncryptedFileStorage {
    dir: PathBuf,
    passphrase: String,
}

impl EncryptedFileStorage {
    pub fn new(dir: impl Into<PathBuf>, passphrase: impl Into<String>) -> Result<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            bail!("Encrypted file storage requires a non-empty passphrase");
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
        Ok(Self { dir, passphrase })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        key_path(&self.dir, key, "enc")
    }

    fn cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive storage key: {}", e))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| anyhow!("Failed to encrypt value"))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < SALT_LEN + NONCE_LEN {
            bail!("Encrypted value is truncated ({} bytes)", data.len());
        }
        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        self.cipher(salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("Failed to decrypt value - wrong passphrase or corrupt file"))
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)
            .with_context(|| format!("Failed to read storage file for {}", key))?;
        let plaintext = self.decrypt(&data)?;
        let value = String::from_utf8(plaintext).context("Stored value is not valid UTF-8")?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let data = self.encrypt(value.as_bytes())?;
        write_private(&path, &data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        remove_if_present(&self.path_for(key)?)
    }
}
