//! Local credential caches used to remember binding passwords.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use sha2::{Digest, Sha256};

use crate::{
    crypto::{aead, encoding, sensitive::SensitiveBytes32},
    error::{Result, SealError},
    fs_secure::{ensure_private_dir, write_private_file_atomic},
};

const KEY_FILE_NAME: &str = ".cache.key";
const ENTRY_AAD: &[u8] = b"sealvault/keystore/v1";
#[cfg(feature = "os-keyring")]
const KEYRING_SERVICE: &str = "sealvault";

/// OS-level credential cache consumed by secret-binding providers.
pub trait CredentialCache: Send + Sync {
    /// Stores `bytes` under `id`, replacing any previous entry.
    fn put(&self, id: &str, bytes: &[u8]) -> Result<()>;

    /// Returns the bytes stored under `id`, or [`SealError::NotFound`].
    fn get(&self, id: &str) -> Result<Vec<u8>>;

    /// Removes the entry under `id`. Missing entries are not an error.
    fn delete(&self, id: &str) -> Result<()>;
}

/// Stable store key for a cache id.
pub fn store_key(id: &str) -> String {
    encoding::encode(&Sha256::digest(id.as_bytes()))
}

/// Cache backed by sealed files under the keystore directory.
///
/// Every entry is encrypted with a random per-install key kept next to the
/// entries with owner-only permissions.
pub struct FileCredentialCache {
    directory: PathBuf,
}

impl FileCredentialCache {
    /// Opens or initializes a cache rooted at `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        ensure_private_dir(&directory)?;
        let cache = Self { directory };
        if !cache.key_path().exists() {
            let key = aead::generate_key();
            write_private_file_atomic(&cache.key_path(), key.as_bytes())?;
        }
        Ok(cache)
    }

    fn key_path(&self) -> PathBuf {
        self.directory.join(KEY_FILE_NAME)
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.directory.join(store_key(id))
    }

    fn load_key(&self) -> Result<SensitiveBytes32> {
        let bytes = fs::read(self.key_path())?;
        SensitiveBytes32::from_slice(&bytes)
            .ok_or_else(|| SealError::InvalidFormat("keystore key file is corrupt".to_owned()))
    }
}

impl CredentialCache for FileCredentialCache {
    fn put(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let key = self.load_key()?;
        let sealed = aead::seal(&key, bytes, ENTRY_AAD)?;
        write_private_file_atomic(&self.entry_path(id), &sealed)?;
        tracing::debug!(entry = %store_key(id), "credential cached");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(id);
        if !path.exists() {
            return Err(SealError::NotFound);
        }
        let key = self.load_key()?;
        aead::open(&key, &fs::read(path)?, ENTRY_AAD)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.entry_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-local cache for tests and short-lived hosts.
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCredentialCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| SealError::Crypto("credential cache lock poisoned".to_owned()))
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn put(&self, id: &str, bytes: &[u8]) -> Result<()> {
        self.entries()?.insert(store_key(id), bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.entries()?
            .get(&store_key(id))
            .cloned()
            .ok_or(SealError::NotFound)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.entries()?.remove(&store_key(id));
        Ok(())
    }
}

/// Cache backed by the platform keychain.
#[cfg(feature = "os-keyring")]
#[derive(Debug, Default)]
pub struct KeyringCredentialCache;

#[cfg(feature = "os-keyring")]
impl KeyringCredentialCache {
    fn entry(id: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, &store_key(id)).map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(error: keyring::Error) -> SealError {
    match error {
        keyring::Error::NoEntry => SealError::NotFound,
        other => SealError::ServiceMisconfigured(format!("os keyring: {other}")),
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialCache for KeyringCredentialCache {
    fn put(&self, id: &str, bytes: &[u8]) -> Result<()> {
        Self::entry(id)?
            .set_secret(bytes)
            .map_err(map_keyring_error)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        Self::entry(id)?.get_secret().map_err(map_keyring_error)
    }

    fn delete(&self, id: &str) -> Result<()> {
        match Self::entry(id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(other) => Err(map_keyring_error(other)),
        }
    }
}
