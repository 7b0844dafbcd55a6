use crate::{
    audit::AuditEvent,
    crypto::{encoding, KeyType, PublicKey, SecretKey, WrappedKey},
    error::{Result, SealError},
};

use super::{item::VaultItem, Vault};

impl Vault {
    fn wrapped_keys(&self) -> Result<Vec<WrappedKey>> {
        self.document
            .spec
            .config
            .wrapped_keys
            .iter()
            .map(|wrapped_key| wrapped_key.parse())
            .collect()
    }

    /// Returns `true` while no vault secret key is held.
    pub fn is_locked(&self) -> bool {
        self.secret_key.is_none()
    }

    /// Unwraps the vault key with `secret_key`. No-op when already unlocked.
    pub fn unlock(&mut self, secret_key: &SecretKey) -> Result<()> {
        if !self.is_locked() {
            return Ok(());
        }
        for wrapped_key in self.wrapped_keys()? {
            let accessor = [secret_key.public_key(false), secret_key.public_key(true)]
                .into_iter()
                .find(|public_key| wrapped_key.is_encrypted_by(public_key));
            let Some(accessor) = accessor else {
                continue;
            };
            let vault_key = match secret_key.decrypt_key(&wrapped_key) {
                Ok(vault_key) => vault_key,
                Err(error) => {
                    tracing::debug!(vault_id = self.id(), %error, "wrapped key did not open");
                    continue;
                }
            };
            self.secret_key = Some(vault_key);
            self.unlocked_by = Some(accessor.clone());
            tracing::debug!(vault_id = self.id(), "vault unlocked");
            self.record(AuditEvent::VaultUnlocked {
                vault_id: self.id().to_owned(),
                public_key_id: encoding::encode(&accessor.id()),
            });
            return Ok(());
        }
        Err(SealError::NotAccessible)
    }

    /// Drops the vault key and every decrypted value.
    pub fn lock(&mut self) {
        self.secret_key = None;
        self.unlocked_by = None;
        self.cache.clear();
        tracing::debug!(vault_id = self.id(), "vault locked");
    }

    /// Public keys the vault is shared with. Works while locked.
    pub fn list_accessors(&self) -> Result<Vec<PublicKey>> {
        self.wrapped_keys()?
            .iter()
            .map(WrappedKey::encrypted_by_public_key)
            .collect()
    }

    /// Returns `true` when `secret_key` can unlock the vault.
    pub fn is_accessible_by(&self, secret_key: &SecretKey) -> bool {
        self.document
            .spec
            .config
            .wrapped_keys
            .iter()
            .filter_map(|wrapped_key| wrapped_key.parse::<WrappedKey>().ok())
            .any(|wrapped_key| {
                wrapped_key.is_encrypted_by(secret_key.public_key(false))
                    || wrapped_key.is_encrypted_by(secret_key.public_key(true))
            })
    }

    /// Wraps the vault key for `public_key`. Sharing twice is a no-op.
    pub fn share(&mut self, public_key: &PublicKey) -> Result<()> {
        let vault_key = self.secret_key.as_ref().ok_or(SealError::VaultLocked)?;
        if public_key.key_type() == KeyType::Vault {
            return Err(SealError::CannotShareWithVault);
        }
        if self
            .wrapped_keys()?
            .iter()
            .any(|wrapped_key| wrapped_key.is_encrypted_by(public_key))
        {
            tracing::debug!(vault_id = self.id(), "vault already shared with key");
            return Ok(());
        }
        self.ensure_writable()?;

        let mut staged = self.document.clone();
        staged
            .spec
            .config
            .wrapped_keys
            .push(public_key.encrypt_key(vault_key)?.to_string());
        self.persist(&mut staged)?;
        self.document = staged;

        let public_key_id = encoding::encode(&public_key.id());
        tracing::info!(vault_id = self.id(), public_key_id = %public_key_id, "vault shared");
        self.record(AuditEvent::VaultShared {
            vault_id: self.id().to_owned(),
            public_key_id,
        });
        Ok(())
    }

    /// Removes accessors by rotating the vault key.
    ///
    /// A fresh vault key is wrapped for the remaining accessors only and
    /// every sealed item is re-encrypted under it. Keys that are not
    /// accessors are ignored. Revoking every accessor fails with
    /// [`SealError::NoWrappedKeys`] and changes nothing.
    pub fn revoke(&mut self, public_keys: &[PublicKey]) -> Result<()> {
        self.ensure_writable()?;
        let vault_key = self.secret_key.as_ref().ok_or(SealError::VaultLocked)?;

        let mut items = Vec::with_capacity(self.document.spec.data.len());
        for (name, raw_value) in &self.document.spec.data {
            items.push((name.clone(), VaultItem::materialize(raw_value, Some(vault_key))?));
        }

        let accessors = self.list_accessors()?;
        let remaining: Vec<PublicKey> = accessors
            .iter()
            .filter(|accessor| !public_keys.contains(accessor))
            .cloned()
            .collect();
        if remaining.len() == accessors.len() {
            tracing::debug!(vault_id = self.id(), "no accessor matched, nothing to revoke");
            return Ok(());
        }
        if remaining.is_empty() {
            tracing::warn!(
                vault_id = self.id(),
                "revoke would leave the vault without accessors; refusing to commit"
            );
        }

        let new_vault_key = SecretKey::generate(KeyType::Vault);
        let new_public_key = new_vault_key
            .public_key(self.public_key.is_post_quantum())
            .clone();

        let mut staged = self.document.clone();
        staged.spec.config.public_key = new_public_key.to_string();
        staged.spec.config.wrapped_keys = remaining
            .iter()
            .map(|accessor| accessor.encrypt_key(&new_vault_key).map(|key| key.to_string()))
            .collect::<Result<_>>()?;
        let hash = staged.spec.config.hash;
        for (name, item) in &items {
            let stored = if item.is_plaintext() {
                item.raw_value().to_owned()
            } else {
                item.value()
                    .expose(|bytes| new_public_key.encrypt_secret(bytes, hash))?
                    .to_string()
            };
            staged.spec.data.insert(name.clone(), stored);
        }
        self.persist(&mut staged)?;

        self.document = staged;
        self.public_key = new_public_key;
        self.secret_key = Some(new_vault_key);
        if self
            .unlocked_by
            .as_ref()
            .is_some_and(|accessor| public_keys.contains(accessor))
        {
            self.unlocked_by = None;
        }
        self.cache.clear();

        let revoked = accessors.len() - remaining.len();
        tracing::info!(
            vault_id = self.id(),
            revoked,
            remaining = remaining.len(),
            "vault key rotated to revoke access"
        );
        self.record(AuditEvent::VaultRevoked {
            vault_id: self.id().to_owned(),
            revoked,
            remaining: remaining.len(),
        });
        Ok(())
    }
}
