use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SealError};

/// `apiVersion` of committed vault documents.
pub const API_VERSION: &str = "sealvault.io/v1";
/// `kind` of committed vault documents.
pub const KIND: &str = "SealVault";
/// Annotation carrying the release that last wrote the vault.
pub const VERSION_ANNOTATION: &str = "sealvault.io/version";

const FILE_SUFFIXES: [&str; 2] = [".sealvault.yaml", ".sealvault.yml"];

/// Kubernetes-style metadata of a vault document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VaultMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) creation_timestamp: Option<DateTime<Utc>>,
}

/// Key material and options of a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VaultConfig {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) public_key: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub(crate) hash: bool,
    #[serde(default)]
    pub(crate) wrapped_keys: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VaultSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) data: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) config: VaultConfig,
}

/// Full on-disk vault document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VaultDocument {
    #[serde(default)]
    pub(crate) api_version: String,
    #[serde(default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) metadata: VaultMetadata,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) secret_type: Option<String>,
    pub(crate) spec: VaultSpec,
}

impl VaultDocument {
    /// Parses a full document, or a bare `spec` body without the envelope.
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        let is_full = value
            .as_mapping()
            .is_some_and(|mapping| mapping.contains_key("spec"));
        if is_full {
            Ok(serde_yaml::from_value(value)?)
        } else if value.is_mapping() {
            Ok(Self {
                spec: serde_yaml::from_value(value)?,
                ..Self::default()
            })
        } else {
            Err(SealError::InvalidFormat(
                "vault document must be a mapping".to_owned(),
            ))
        }
    }

    /// Fills metadata defaults and checks the key invariants before a commit.
    pub(crate) fn validate(&mut self, path: Option<&Path>) -> Result<()> {
        self.api_version = API_VERSION.to_owned();
        self.kind = KIND.to_owned();
        if self.metadata.name.is_empty() {
            if let Some(name) = path.and_then(name_from_path) {
                self.metadata.name = name;
            }
        }
        self.metadata.annotations.insert(
            VERSION_ANNOTATION.to_owned(),
            env!("CARGO_PKG_VERSION").to_owned(),
        );
        if self.metadata.creation_timestamp.is_none() {
            self.metadata.creation_timestamp = Some(Utc::now().trunc_subsecs(0));
        }
        if self.spec.config.public_key.is_empty() {
            return Err(SealError::InvalidFormat(
                "vault public key not found".to_owned(),
            ));
        }
        if self.spec.config.wrapped_keys.is_empty() {
            return Err(SealError::NoWrappedKeys);
        }
        Ok(())
    }

    /// Renders the committed YAML with its placeholder hint comment.
    pub(crate) fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!(
            "# Use the pattern {{{{SEAL.{}.YOUR_ITEM_NAME}}}} as placeholder to reference data from this vault into files\n{body}",
            self.metadata.name
        ))
    }
}

/// Rejects paths that do not carry a vault file suffix.
pub(crate) fn check_file_name(path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if FILE_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix)) {
        Ok(())
    } else {
        Err(SealError::InvalidInput(format!(
            "invalid vault file name `{}`: must end with .sealvault.yaml or .sealvault.yml",
            path.display()
        )))
    }
}

/// Derives a vault name from `<name>.sealvault.yaml`.
pub(crate) fn name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    FILE_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}
