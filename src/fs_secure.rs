use std::{
    fs,
    path::{Path, PathBuf},
};

use uuid::Uuid;

use crate::error::Result;

/// Default Unix mode for private directories.
pub const PRIVATE_DIR_MODE: u32 = 0o700;
/// Default Unix mode for private files.
pub const PRIVATE_FILE_MODE: u32 = 0o600;
/// Unix mode for vault files, which are meant to be committed and shared.
pub const SHARED_FILE_MODE: u32 = 0o644;

/// Ensures a directory exists and applies restricted permissions.
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    set_permissions(path, PRIVATE_DIR_MODE)
}

/// Writes a file atomically with restricted permissions.
pub fn write_private_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_file_atomic(path, bytes, PRIVATE_FILE_MODE)
}

/// Writes a file atomically with the given mode.
///
/// The bytes land in a sibling temp file first, so readers observe either the
/// previous content or the new content, never a partial write.
pub fn write_file_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    create_parent_dir(path)?;

    let temp_path = temp_path_for(path);
    if let Err(error) = fs::write(&temp_path, bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(error.into());
    }
    set_permissions(&temp_path, mode)?;
    fs::rename(&temp_path, path)?;
    set_permissions(path, mode)
}

/// Writes a private file only if it does not exist.
pub fn create_private_file_if_missing(path: &Path, bytes: &[u8]) -> Result<()> {
    if !path.exists() {
        write_private_file_atomic(path, bytes)?;
    }
    Ok(())
}

/// Applies Unix permissions when supported.
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = Uuid::new_v4();
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("tmp");
    path.with_file_name(format!(".{file_name}.{suffix}.tmp"))
}

fn create_parent_dir(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
