use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "sealvault";

/// Canonical layout of the per-user application data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Creates a path layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Layout rooted at the platform data directory, if one exists.
    pub fn platform_default() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::new(dir.join(APP_DIR_NAME)))
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local credential cache directory.
    pub fn keystore_dir(&self) -> PathBuf {
        self.root.join("keystore")
    }

    /// Environment record of the current user.
    pub fn self_env_file(&self) -> PathBuf {
        self.root.join(".self")
    }

    /// Known environments manifest.
    pub fn environments_file(&self) -> PathBuf {
        self.root.join("environments.yaml")
    }

    /// Audit log JSONL file.
    pub fn audit_file(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }
}
