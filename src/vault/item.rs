use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::crypto::{SealedSecret, SecretKey};
use crate::error::{Result, SealError};
use crate::types::SecretValue;

/// A materialized vault item.
#[derive(Debug, Clone)]
pub struct VaultItem {
    raw_value: String,
    plaintext: bool,
    value: SecretValue,
    encrypted_at: Option<DateTime<Utc>>,
    hash: Option<String>,
}

impl VaultItem {
    /// Interprets a stored value: a sealed secret is opened with
    /// `secret_key`, anything else is plaintext.
    pub(crate) fn materialize(raw_value: &str, secret_key: Option<&SecretKey>) -> Result<Self> {
        let Ok(sealed) = raw_value.parse::<SealedSecret>() else {
            return Ok(Self {
                raw_value: raw_value.to_owned(),
                plaintext: true,
                value: SecretValue::from(raw_value),
                encrypted_at: None,
                hash: None,
            });
        };
        let secret_key = secret_key.ok_or(SealError::VaultLocked)?;
        Ok(Self {
            raw_value: raw_value.to_owned(),
            plaintext: false,
            value: secret_key.decrypt_secret(&sealed)?,
            encrypted_at: Some(sealed.encrypted_at()),
            hash: sealed.hash(),
        })
    }

    /// Stored form: a sealed secret string or the plaintext itself.
    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }

    /// Returns `true` when the item is stored without encryption.
    pub fn is_plaintext(&self) -> bool {
        self.plaintext
    }

    /// Decrypted value.
    pub fn value(&self) -> &SecretValue {
        &self.value
    }

    /// When the value was sealed.
    pub fn encrypted_at(&self) -> Option<DateTime<Utc>> {
        self.encrypted_at
    }

    /// Content hash stored beside the sealed value, when hashing was on.
    ///
    /// The hash is short and memory-hard but still guessable for
    /// low-entropy values; it only signals rotation.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }
}

/// Decrypted items of one vault instance.
#[derive(Debug, Default)]
pub(crate) struct ItemCache {
    items: HashMap<String, VaultItem>,
}

impl ItemCache {
    pub(crate) fn get(&self, name: &str) -> Option<&VaultItem> {
        self.items.get(name)
    }

    pub(crate) fn put(&mut self, name: &str, item: VaultItem) {
        self.items.insert(name.to_owned(), item);
    }

    pub(crate) fn evict(&mut self, name: &str) {
        if self.items.remove(name).is_some() {
            tracing::debug!(item = name, "vault item evicted from cache");
        }
    }

    pub(crate) fn clear(&mut self) {
        if !self.items.is_empty() {
            tracing::debug!(items = self.items.len(), "vault item cache cleared");
        }
        self.items.clear();
    }
}
