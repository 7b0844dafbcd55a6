//! Environment identity records and the local manifest of known environments.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    audit::AuditEvent,
    crypto::{encoding, KeyType, PublicKey, SecretKey, PREFIX},
    error::{Result, SealError},
    fs_secure::write_private_file_atomic,
    paths::AppPaths,
    providers::{ProviderInputs, ProviderRegistry},
};

const DEF_STRING_ABBREV: &str = "EDS";

/// Kind of identity an environment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvType {
    /// A person.
    User,
    /// A workload or automation.
    Service,
}

impl fmt::Display for EnvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Service => "service",
        })
    }
}

/// Public identity record: who may be given access to vaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    public_key: PublicKey,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    email: String,
    #[serde(rename = "type")]
    env_type: EnvType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    secret_binding: String,
}

impl Environment {
    /// Creates an environment with a fresh secret key.
    pub fn new(name: &str, env_type: EnvType, quantum_safe: bool) -> (Self, SecretKey) {
        let secret_key = SecretKey::generate(KeyType::Environment);
        let environment =
            Self::from_public_key(name, env_type, secret_key.public_key(quantum_safe).clone());
        (environment, secret_key)
    }

    /// Wraps an existing public key.
    pub fn from_public_key(name: &str, env_type: EnvType, public_key: PublicKey) -> Self {
        Self {
            public_key,
            name: name.to_owned(),
            email: String::new(),
            env_type,
            tags: BTreeSet::new(),
            secret_binding: String::new(),
        }
    }

    /// Public key of the environment.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contact email, possibly empty.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// User or service.
    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    /// Free-form tags.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Serialized secret binding, possibly empty.
    pub fn secret_binding(&self) -> &str {
        &self.secret_binding
    }

    /// Sets the contact email.
    pub fn set_email(&mut self, email: &str) {
        self.email = email.to_owned();
    }

    /// Adds tags, ignoring blanks and duplicates.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags.extend(
            tags.into_iter()
                .map(|tag| tag.as_ref().trim().to_owned())
                .filter(|tag| !tag.is_empty()),
        );
    }

    /// Replaces the secret binding.
    pub fn set_secret_binding(&mut self, binding: &str) {
        self.secret_binding = binding.to_owned();
    }

    /// Case-insensitive substring match over name, email, type, and tags.
    pub fn search(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        let mut haystack = format!("{}\n{}\n{}", self.name, self.email, self.env_type);
        for tag in &self.tags {
            haystack.push('\n');
            haystack.push_str(tag);
        }
        haystack.to_lowercase().contains(&query)
    }

    /// Shareable `SEAL_EDS_...` string, optionally without the binding.
    pub fn to_def_string(&self, include_binding: bool) -> Result<String> {
        let data = if include_binding {
            encoding::serialize(self)?
        } else {
            let mut public = self.clone();
            public.secret_binding.clear();
            encoding::serialize(&public)?
        };
        Ok(format!("{PREFIX}_{DEF_STRING_ABBREV}_{data}"))
    }

    /// Parses a `SEAL_EDS_...` string.
    pub fn from_def_string(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split('_').collect();
        match parts.as_slice() {
            [prefix, abbrev, data] if *prefix == PREFIX && *abbrev == DEF_STRING_ABBREV => {
                let environment: Self = encoding::deserialize(data)?;
                if environment.public_key.key_type() != KeyType::Environment {
                    return Err(SealError::InvalidFormat(
                        "environment definition carries a non-environment key".to_owned(),
                    ));
                }
                Ok(environment)
            }
            _ => Err(SealError::InvalidFormat(
                "invalid environment definition string".to_owned(),
            )),
        }
    }
}

/// Creates an environment and binds its fresh secret key with `provider_id`.
///
/// The returned secret key is the caller's only plaintext copy; it should be
/// dropped as soon as it is no longer needed.
pub fn new_environment(
    registry: &ProviderRegistry,
    provider_id: &str,
    name: &str,
    env_type: EnvType,
    inputs: &ProviderInputs,
    quantum_safe: bool,
) -> Result<(Environment, SecretKey)> {
    let (mut environment, secret_key) = Environment::new(name, env_type, quantum_safe);
    let binding = registry.bind(provider_id, &secret_key, inputs)?;
    if registry.get(provider_id)?.ref_required() {
        environment.set_secret_binding(&binding.to_string());
    }
    tracing::info!(provider = provider_id, env_type = %env_type, "environment created");
    if let Some(audit) = registry.audit_log() {
        audit.record(AuditEvent::EnvironmentCreated {
            name: name.to_owned(),
            public_key_id: encoding::encode(&environment.public_key.id()),
        });
    }
    Ok((environment, secret_key))
}

/// Persists `environment` as the current user's identity.
pub fn set_self(paths: &AppPaths, environment: &Environment) -> Result<()> {
    if environment.secret_binding.is_empty() {
        return Err(SealError::InvalidInput(
            "cannot mark environment as self: secret binding not found".to_owned(),
        ));
    }
    if environment.env_type != EnvType::User {
        return Err(SealError::InvalidInput(
            "cannot mark a non-user environment as self".to_owned(),
        ));
    }
    let yaml = serde_yaml::to_string(environment)?;
    write_private_file_atomic(&paths.self_env_file(), yaml.as_bytes())
}

/// Loads the current user's identity, if one was set.
pub fn get_self(paths: &AppPaths) -> Result<Option<Environment>> {
    let path = paths.self_env_file();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&fs::read_to_string(path)?)?))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<Environment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    environments: BTreeMap<String, Environment>,
}

/// YAML list of known environments, keyed by public key.
#[derive(Debug)]
pub struct EnvironmentManifest {
    path: PathBuf,
    document: ManifestDocument,
}

impl EnvironmentManifest {
    /// Loads the manifest at `path`, or starts an empty one if it is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            serde_yaml::from_str(&fs::read_to_string(&path)?)?
        } else {
            ManifestDocument::default()
        };
        Ok(Self { path, document })
    }

    /// Loads the manifest from the app data directory.
    pub fn open_default(paths: &AppPaths) -> Result<Self> {
        Self::open(paths.environments_file())
    }

    /// Writes the manifest.
    pub fn commit(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.document)?;
        write_private_file_atomic(&self.path, yaml.as_bytes())
    }

    /// Root environment, if set.
    pub fn root(&self) -> Option<&Environment> {
        self.document.root.as_ref()
    }

    /// Sets the root environment once.
    pub fn set_root(&mut self, environment: Environment) -> Result<()> {
        if self.document.root.is_some() {
            return Err(SealError::ExistsAlready);
        }
        self.document.root = Some(environment);
        self.commit()
    }

    /// Adds or replaces an environment.
    pub fn put(&mut self, environment: Environment) -> Result<()> {
        self.document
            .environments
            .insert(environment.public_key.to_string(), environment);
        self.commit()
    }

    /// Looks up an environment by public key string.
    pub fn get(&self, public_key: &str) -> Option<&Environment> {
        self.document.environments.get(public_key)
    }

    /// Every environment, ordered by public key.
    pub fn list(&self) -> Vec<&Environment> {
        self.document.environments.values().collect()
    }

    /// Environments matching any of `queries`, without duplicates.
    pub fn search<S: AsRef<str>>(&self, queries: &[S]) -> Vec<&Environment> {
        self.document
            .environments
            .values()
            .filter(|environment| {
                queries.iter().any(|query| {
                    let query = query.as_ref();
                    !query.is_empty() && environment.search(query)
                })
            })
            .collect()
    }

    /// Removes an environment by public key string.
    pub fn remove(&mut self, public_key: &str) -> Result<Environment> {
        let environment = self
            .document
            .environments
            .remove(public_key)
            .ok_or(SealError::NotFound)?;
        self.commit()?;
        Ok(environment)
    }
}
