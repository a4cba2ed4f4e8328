//! Uninstall guard and removal
//!
//! Only roots that lexically sit in the launcher namespace may be deleted.
//! A `custom` root pointing somewhere else is refused even if it looks like
//! an install.

use crate::environment::NAMESPACE_MARKERS;
use log::info;
use std::path::{Component, Path, PathBuf};

/// Whether `install_root` may be deleted by uninstall.
///
/// Accepts roots ending in one of the namespace markers, or equal to one of
/// the resolver's own roots. Roots with `..` or no parent never pass.
pub fn is_recognized_root(install_root: &Path, known_roots: &[PathBuf]) -> bool {
    if install_root
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
    {
        return false;
    }
    if install_root.parent().is_none() {
        return false;
    }

    if known_roots.iter().any(|known| known == install_root) {
        return true;
    }

    let normalized = PathBuf::from(install_root.to_string_lossy().replace('\\', "/"));
    NAMESPACE_MARKERS
        .iter()
        .any(|marker| normalized.ends_with(marker))
}

/// Delete an install root. A missing directory counts as success.
/// Returns whether anything was removed.
pub async fn remove_install_root(root_fs: &Path) -> Result<bool, String> {
    match tokio::fs::symlink_metadata(root_fs).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("{} already absent", root_fs.display());
            return Ok(false);
        }
        Err(e) => return Err(format!("Failed to inspect {}: {}", root_fs.display(), e)),
        Ok(meta) if !meta.is_dir() => {
            tokio::fs::remove_file(root_fs)
                .await
                .map_err(|e| format!("Failed to remove {}: {}", root_fs.display(), e))?;
            return Ok(true);
        }
        Ok(_) => {}
    }

    tokio::fs::remove_dir_all(root_fs)
        .await
        .map_err(|e| format!("Failed to remove {}: {}", root_fs.display(), e))?;
    info!("Removed {}", root_fs.display());
    Ok(true)
}
