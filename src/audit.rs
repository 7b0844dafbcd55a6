use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    fs_secure::{create_private_file_if_missing, set_permissions, PRIVATE_FILE_MODE},
};

/// Audit events emitted by vault and environment operations.
///
/// Events carry identifiers only. Item values, passwords, and key material
/// never reach the log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Vault was created.
    VaultCreated {
        /// Vault id.
        vault_id: String,
        /// Vault display name.
        name: String,
        /// Number of initial recipients.
        recipients: usize,
    },
    /// Item was written.
    ItemPut {
        /// Vault id.
        vault_id: String,
        /// Item name.
        item: String,
        /// Whether the value was sealed.
        encrypted: bool,
    },
    /// Items were removed.
    ItemsDeleted {
        /// Vault id.
        vault_id: String,
        /// Removed item names.
        items: Vec<String>,
    },
    /// Vault key was wrapped for a new accessor.
    VaultShared {
        /// Vault id.
        vault_id: String,
        /// Accessor public key id (base32).
        public_key_id: String,
    },
    /// Vault key was rotated to drop accessors.
    VaultRevoked {
        /// Vault id.
        vault_id: String,
        /// Number of revoked accessors.
        revoked: usize,
        /// Number of remaining accessors.
        remaining: usize,
    },
    /// Vault was unlocked.
    VaultUnlocked {
        /// Vault id.
        vault_id: String,
        /// Unlocking public key id (base32).
        public_key_id: String,
    },
    /// Environment identity was created.
    EnvironmentCreated {
        /// Environment display name.
        name: String,
        /// Public key id (base32).
        public_key_id: String,
    },
    /// Secret key was bound through a provider.
    SecretBound {
        /// Provider id.
        provider: String,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct AuditLine {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: AuditEvent,
}

/// JSONL append-only audit log writer.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref().to_path_buf();
        create_private_file_if_missing(&file_path, b"")?;
        set_permissions(&file_path, PRIVATE_FILE_MODE)?;
        Ok(Self { path: file_path })
    }

    /// Appends one event as a JSON line.
    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let line = AuditLine {
            timestamp: Utc::now(),
            event,
        };

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        serde_json::to_writer(&mut file, &line)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Appends one event, downgrading a write failure to a warning.
    ///
    /// Used after a mutation has already been committed.
    pub fn record(&self, event: AuditEvent) {
        if let Err(error) = self.log(event) {
            tracing::warn!(path = %self.path.display(), %error, "failed to append audit event");
        }
    }

    /// Returns the audit file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
