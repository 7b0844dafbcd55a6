use std::{
    fs,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SealError},
    keystore::{CredentialCache, FileCredentialCache, MemoryCredentialCache},
    paths::AppPaths,
    providers::password::{PasswordProvider, DEFAULT_PASSWORD_ENV_VAR},
};

const CONFIG_VERSION_V1: u32 = 1;

/// Default bootstrap config file name.
pub const CONFIG_FILE_NAME: &str = ".sealvault.toml";
/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SEALVAULT_CONFIG";

/// Source used to select the effective config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigSource {
    /// Selected by an explicit path from the caller.
    Explicit,
    /// Selected via the `SEALVAULT_CONFIG` environment variable.
    Env,
    /// Selected by walking from the current working directory to root.
    Discovered,
    /// No config file selected.
    None,
}

/// Resolved config selection before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSelection {
    /// Source used for selection.
    pub source: ConfigSource,
    /// Selected path when a config file was found.
    pub path: Option<PathBuf>,
}

/// Where cached passwords are kept.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreBackend {
    /// Sealed files under the app data directory.
    #[default]
    File,
    /// Platform keychain (`os-keyring` feature).
    Keyring,
    /// Process memory only.
    Memory,
}

/// Raw TOML document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SealConfigFile {
    /// Schema version.
    pub version: u32,
    /// Path settings.
    #[serde(default)]
    pub paths: ConfigPathsFile,
    /// Key generation settings.
    #[serde(default)]
    pub crypto: CryptoConfigFile,
    /// Password provider settings.
    #[serde(default)]
    pub password: PasswordConfigFile,
    /// Credential cache settings.
    #[serde(default)]
    pub keystore: KeystoreConfigFile,
}

/// `[paths]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigPathsFile {
    /// App data directory.
    pub root: Option<String>,
}

/// `[crypto]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CryptoConfigFile {
    /// Generate hybrid post-quantum public keys.
    pub quantum_safe: Option<bool>,
    /// Store content hashes beside sealed values in new vaults.
    pub hash: Option<bool>,
}

/// `[password]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PasswordConfigFile {
    /// Environment variable holding the binding password.
    pub env_var: Option<String>,
}

/// `[keystore]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeystoreConfigFile {
    /// Cache backend.
    pub backend: Option<KeystoreBackend>,
}

/// Validated effective configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealConfig {
    /// Config file the values came from, if any.
    pub source_path: Option<PathBuf>,
    /// App data directory.
    pub root: PathBuf,
    /// Generate hybrid post-quantum public keys.
    pub quantum_safe: bool,
    /// Store content hashes in new vaults.
    pub hash: bool,
    /// Environment variable holding the binding password.
    pub password_env_var: String,
    /// Cache backend.
    pub keystore_backend: KeystoreBackend,
}

impl SealConfig {
    /// Defaults used when no config file is selected.
    pub fn defaults() -> Result<Self> {
        let root = AppPaths::platform_default()
            .map(|paths| paths.root().to_path_buf())
            .ok_or_else(|| {
                SealError::InvalidInput("no platform data directory; set paths.root".to_owned())
            })?;
        Ok(Self {
            source_path: None,
            root,
            quantum_safe: false,
            hash: false,
            password_env_var: DEFAULT_PASSWORD_ENV_VAR.to_owned(),
            keystore_backend: KeystoreBackend::File,
        })
    }

    /// Loads the config chosen by `selection`, or the defaults when none was.
    pub fn load(selection: &ConfigSelection) -> Result<Self> {
        match &selection.path {
            Some(path) => Self::load_from_path(path),
            None => Self::defaults(),
        }
    }

    /// Loads and validates a config file from disk.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let absolute_path = absolutize_path(path.as_ref(), &cwd);
        if !absolute_path.exists() {
            return Err(SealError::InvalidInput(format!(
                "config file does not exist: {}",
                absolute_path.display()
            )));
        }

        validate_config_file_permissions(&absolute_path)?;
        let raw = fs::read_to_string(&absolute_path)?;
        Self::parse_from_str(&raw, &absolute_path)
    }

    /// Parses and validates config from TOML text.
    pub fn parse_from_str(raw: &str, source_path: impl AsRef<Path>) -> Result<Self> {
        let parsed = toml::from_str::<SealConfigFile>(raw)
            .map_err(|error| SealError::InvalidInput(format!("invalid config TOML: {error}")))?;
        build_config(parsed, source_path.as_ref())
    }

    /// App data layout rooted at [`SealConfig::root`].
    pub fn paths(&self) -> AppPaths {
        AppPaths::new(&self.root)
    }

    /// Credential cache for the configured backend.
    pub fn credential_cache(&self) -> Result<Arc<dyn CredentialCache>> {
        match self.keystore_backend {
            KeystoreBackend::File => Ok(Arc::new(FileCredentialCache::new(
                self.paths().keystore_dir(),
            )?)),
            KeystoreBackend::Memory => Ok(Arc::new(MemoryCredentialCache::new())),
            #[cfg(feature = "os-keyring")]
            KeystoreBackend::Keyring => Ok(Arc::new(crate::keystore::KeyringCredentialCache)),
            #[cfg(not(feature = "os-keyring"))]
            KeystoreBackend::Keyring => Err(SealError::ServiceMisconfigured(
                "keystore backend `keyring` requires the os-keyring feature".to_owned(),
            )),
        }
    }

    /// Password provider reading the configured variable and cache.
    pub fn password_provider(&self) -> Result<PasswordProvider> {
        Ok(PasswordProvider::new()
            .with_env_var(&self.password_env_var)
            .with_cache(self.credential_cache()?))
    }
}

/// Resolves one config path based on precedence rules.
pub fn resolve_config_path(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    cwd: impl AsRef<Path>,
) -> Result<ConfigSelection> {
    let cwd = cwd.as_ref();
    if let Some(path) = explicit_path {
        let candidate = absolutize_path(path, cwd);
        if !is_regular_config_candidate(&candidate) {
            return Err(SealError::InvalidInput(format!(
                "config file must be a regular file: {}",
                candidate.display()
            )));
        }
        return Ok(ConfigSelection {
            source: ConfigSource::Explicit,
            path: Some(candidate),
        });
    }

    if let Some(value) = env_path {
        if value.trim().is_empty() {
            return Err(SealError::InvalidInput(format!(
                "{CONFIG_ENV_VAR} cannot be empty"
            )));
        }

        let candidate = absolutize_path(Path::new(value), cwd);
        if !is_regular_config_candidate(&candidate) {
            return Err(SealError::InvalidInput(format!(
                "config file must be a regular file: {}",
                candidate.display()
            )));
        }
        return Ok(ConfigSelection {
            source: ConfigSource::Env,
            path: Some(candidate),
        });
    }

    if let Some(discovered) = discover_config(cwd) {
        return Ok(ConfigSelection {
            source: ConfigSource::Discovered,
            path: Some(discovered),
        });
    }

    Ok(ConfigSelection {
        source: ConfigSource::None,
        path: None,
    })
}

/// Discovers `.sealvault.toml` by walking from `start_dir` to filesystem root.
pub fn discover_config(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref();
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if is_regular_config_candidate(&candidate) {
            return Some(candidate);
        }

        let parent = current.parent()?;
        current = parent;
    }
}

fn build_config(raw: SealConfigFile, source_path: &Path) -> Result<SealConfig> {
    if raw.version != CONFIG_VERSION_V1 {
        return Err(SealError::InvalidInput(format!(
            "unsupported config version {} (expected {})",
            raw.version, CONFIG_VERSION_V1
        )));
    }

    let defaults = SealConfig::defaults();
    let source_path = absolutize_path(source_path, &std::env::current_dir()?);
    let source_dir = source_path.parent().unwrap_or(Path::new("."));

    let root = match raw.paths.root.as_deref() {
        Some(value) => resolve_path_value(value, source_dir, "paths.root")?,
        None => defaults?.root,
    };

    let password_env_var = match raw.password.env_var {
        Some(name) => {
            validate_env_var_name(&name)?;
            name
        }
        None => DEFAULT_PASSWORD_ENV_VAR.to_owned(),
    };

    Ok(SealConfig {
        source_path: Some(source_path),
        root,
        quantum_safe: raw.crypto.quantum_safe.unwrap_or(false),
        hash: raw.crypto.hash.unwrap_or(false),
        password_env_var,
        keystore_backend: raw.keystore.backend.unwrap_or_default(),
    })
}

fn validate_env_var_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|character: char| character.is_ascii_digit())
        && name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_');
    if valid {
        Ok(())
    } else {
        Err(SealError::InvalidInput(format!(
            "invalid password.env_var '{name}': use [A-Za-z0-9_] and do not start with a digit"
        )))
    }
}

fn resolve_path_value(value: &str, source_dir: &Path, label: &str) -> Result<PathBuf> {
    if value.trim().is_empty() {
        return Err(SealError::InvalidInput(format!("{label} cannot be empty")));
    }

    let expanded = expand_home(value)?;
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        source_dir.join(expanded)
    };

    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return Ok(canonical);
    }
    Ok(normalize_path(&absolute))
}

fn expand_home(value: &str) -> Result<PathBuf> {
    let home = || {
        dirs::home_dir().ok_or_else(|| SealError::InvalidInput("HOME is not set".to_owned()))
    };
    if value == "~" {
        return home();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return Ok(home()?.join(rest));
    }
    if value.starts_with('~') {
        return Err(SealError::InvalidInput(
            "only '~' and '~/' home expansion are supported".to_owned(),
        ));
    }
    Ok(PathBuf::from(value))
}

fn normalize_path(path: &Path) -> PathBuf {
    let is_absolute = path.is_absolute();
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() && !is_absolute {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        if is_absolute {
            PathBuf::from(std::path::MAIN_SEPARATOR.to_string())
        } else {
            PathBuf::from(".")
        }
    } else {
        normalized
    }
}

fn absolutize_path(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&cwd.join(path))
    }
}

fn validate_config_file_permissions(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() || !metadata.file_type().is_file() {
        return Err(SealError::InvalidInput(format!(
            "config path must be a regular file: {}",
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o022 != 0 {
            return Err(SealError::InvalidInput(format!(
                "config file must not be group/world writable: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn is_regular_config_candidate(path: &Path) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    !metadata.file_type().is_symlink() && metadata.file_type().is_file()
}
