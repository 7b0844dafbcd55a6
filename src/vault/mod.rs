//! Vault files: named items sealed under a vault key that is wrapped once
//! per accessor.
//!
//! Every mutation is staged on a copy of the document, committed, and only
//! then applied to the in-memory vault, so a failed commit leaves both the
//! file and the instance in their previous state.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use rand::{rngs::OsRng, RngCore};

use crate::{
    audit::{AuditEvent, AuditLog},
    crypto::{encoding, KeyType, PublicKey, SecretKey, PREFIX},
    error::{Result, SealError},
    fs_secure::{write_file_atomic, SHARED_FILE_MODE},
};

mod access;
mod data;
mod document;
mod item;
mod reference;

pub use document::{API_VERSION, KIND, VERSION_ANNOTATION};
pub use item::VaultItem;
pub use reference::{RefKind, RefOutcome};

use document::VaultDocument;
use item::ItemCache;

const VAULT_ID_ABBREV: &str = "VID";
const VAULT_ID_LEN: usize = 30;

/// Options for [`Vault::create`].
#[derive(Debug, Clone, Default)]
pub struct VaultOptions {
    /// Display name. Defaults to the file name without its vault suffix.
    pub name: Option<String>,
    /// Kubernetes namespace.
    pub namespace: Option<String>,
    /// Store a short content hash beside each sealed value.
    pub hash: bool,
    /// Use the hybrid post-quantum vault public key.
    pub quantum_safe: bool,
    /// Audit log for committed mutations.
    pub audit: Option<AuditLog>,
}

/// An open vault.
pub struct Vault {
    path: Option<PathBuf>,
    document: VaultDocument,
    public_key: PublicKey,
    secret_key: Option<SecretKey>,
    unlocked_by: Option<PublicKey>,
    cache: ItemCache,
    audit: Option<AuditLog>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("path", &self.path)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

fn new_vault_id() -> String {
    let mut bytes = [0_u8; VAULT_ID_LEN];
    OsRng.fill_bytes(&mut bytes);
    format!("{PREFIX}_{VAULT_ID_ABBREV}_{}", encoding::encode(&bytes))
}

impl Vault {
    /// Creates a vault file at `path`, shared with every key in `recipients`.
    ///
    /// The new vault is returned unlocked.
    pub fn create(
        path: impl AsRef<Path>,
        options: VaultOptions,
        recipients: &[PublicKey],
    ) -> Result<Self> {
        let path = path.as_ref();
        document::check_file_name(path)?;
        if path.exists() {
            return Err(SealError::ExistsAlready);
        }
        if recipients.is_empty() {
            return Err(SealError::NoRecipients);
        }

        let vault_key = SecretKey::generate(KeyType::Vault);
        let public_key = vault_key.public_key(options.quantum_safe).clone();

        let mut document = VaultDocument::default();
        document.metadata.name = options
            .name
            .filter(|name| !name.is_empty())
            .or_else(|| document::name_from_path(path))
            .unwrap_or_default();
        document.metadata.namespace = options.namespace.filter(|namespace| !namespace.is_empty());
        document.spec.config.id = new_vault_id();
        document.spec.config.public_key = public_key.to_string();
        document.spec.config.hash = options.hash;

        let mut shared: Vec<&PublicKey> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if recipient.key_type() == KeyType::Vault {
                return Err(SealError::CannotShareWithVault);
            }
            if shared.contains(&recipient) {
                continue;
            }
            let wrapped_key = recipient.encrypt_key(&vault_key)?;
            document.spec.config.wrapped_keys.push(wrapped_key.to_string());
            shared.push(recipient);
        }

        let mut vault = Self {
            path: Some(path.to_path_buf()),
            document: VaultDocument::default(),
            public_key,
            secret_key: Some(vault_key),
            unlocked_by: None,
            cache: ItemCache::default(),
            audit: options.audit,
        };
        vault.persist(&mut document)?;
        vault.document = document;

        tracing::info!(
            vault_id = vault.id(),
            name = vault.name(),
            recipients = shared.len(),
            quantum_safe = options.quantum_safe,
            "vault created"
        );
        vault.record(AuditEvent::VaultCreated {
            vault_id: vault.id().to_owned(),
            name: vault.name().to_owned(),
            recipients: shared.len(),
        });
        Ok(vault)
    }

    /// Opens an existing vault file. The vault starts locked.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        document::check_file_name(path)?;
        if !path.exists() {
            return Err(SealError::NotFound);
        }
        let mut vault = Self::from_document(VaultDocument::parse(&fs::read_to_string(path)?)?)?;
        vault.path = Some(path.to_path_buf());
        if vault.document.metadata.name.is_empty() {
            vault.document.metadata.name = document::name_from_path(path).unwrap_or_default();
        }
        tracing::debug!(vault_id = vault.id(), path = %path.display(), "vault opened");
        Ok(vault)
    }

    fn from_document(document: VaultDocument) -> Result<Self> {
        let public_key = document.spec.config.public_key.parse::<PublicKey>()?;
        if public_key.key_type() != KeyType::Vault {
            return Err(SealError::InvalidFormat(
                "vault public key has a non-vault key type".to_owned(),
            ));
        }
        Ok(Self {
            path: None,
            document,
            public_key,
            secret_key: None,
            unlocked_by: None,
            cache: ItemCache::default(),
            audit: None,
        })
    }

    /// Records committed mutations in `audit`.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Vault id (`SEAL_VID_...`).
    pub fn id(&self) -> &str {
        &self.document.spec.config.id
    }

    /// Display name, also used in reference placeholders.
    pub fn name(&self) -> &str {
        &self.document.metadata.name
    }

    /// Kubernetes namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.document.metadata.namespace.as_deref()
    }

    /// Kubernetes secret type, if any.
    pub fn secret_type(&self) -> Option<&str> {
        self.document.secret_type.as_deref()
    }

    /// Current vault public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Whether sealed values carry a content hash.
    pub fn hash_enabled(&self) -> bool {
        self.document.spec.config.hash
    }

    /// Backing file, absent for vaults parsed from a string.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether mutations can be committed.
    pub fn is_writable(&self) -> bool {
        self.path.is_some()
    }

    /// Accessor key that unlocked the vault, if it was unlocked by one.
    pub fn unlocked_by(&self) -> Option<&PublicKey> {
        self.unlocked_by.as_ref()
    }

    /// Changes the Kubernetes-style metadata.
    ///
    /// `Some("")` clears the namespace or type; the name cannot be cleared.
    pub fn update(
        &mut self,
        name: Option<&str>,
        namespace: Option<&str>,
        secret_type: Option<&str>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let mut staged = self.document.clone();
        if let Some(name) = name {
            staged.metadata.name = name.trim().to_owned();
        }
        if staged.metadata.name.is_empty() {
            return Err(SealError::InvalidInput("vault name must not be empty".to_owned()));
        }
        if let Some(namespace) = namespace {
            staged.metadata.namespace = Some(namespace.trim().to_owned()).filter(|v| !v.is_empty());
        }
        if let Some(secret_type) = secret_type {
            staged.secret_type = Some(secret_type.trim().to_owned()).filter(|v| !v.is_empty());
        }
        self.persist(&mut staged)?;
        self.document = staged;
        tracing::info!(vault_id = self.id(), name = self.name(), "vault metadata updated");
        Ok(())
    }

    /// Removes the backing file.
    pub fn delete_file(self) -> Result<()> {
        let path = self.path.as_deref().ok_or(SealError::NotWritable)?;
        fs::remove_file(path)?;
        tracing::info!(vault_id = self.id(), path = %path.display(), "vault file deleted");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(SealError::NotWritable)
        }
    }

    /// Validates `staged` and writes it to the backing file.
    fn persist(&self, staged: &mut VaultDocument) -> Result<()> {
        let path = self.path.as_deref().ok_or(SealError::NotWritable)?;
        staged.validate(Some(path))?;
        write_file_atomic(path, staged.to_yaml()?.as_bytes(), SHARED_FILE_MODE)?;
        tracing::debug!(vault_id = %staged.spec.config.id, path = %path.display(), "vault committed");
        Ok(())
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

impl FromStr for Vault {
    type Err = SealError;

    /// Parses vault YAML without a backing file. The result is read-only.
    fn from_str(text: &str) -> Result<Self> {
        Self::from_document(VaultDocument::parse(text)?)
    }
}
