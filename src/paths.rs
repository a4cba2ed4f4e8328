//! Path helpers for Lantern launcher directories
//!
//! This module centralizes path resolution for:
//! - The launcher home directory (~/.lantern)
//! - The private runtime cache
//! - The launcher config file
//! - The prebuilt server bundle shipped next to the executable
//!
//! Install roots are not resolved here; see `environment`.

use std::path::{Path, PathBuf};

/// Directory name of the bundled server next to the launcher executable
pub const BUNDLE_DIR_NAME: &str = "server-bundle";

// ============================================================================
// HOME DIRECTORY
// ============================================================================

/// Resolve the user's home directory across platforms.
pub fn get_home_dir() -> Result<PathBuf, String> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    if let Ok(profile) = std::env::var("USERPROFILE") {
        if !profile.is_empty() {
            return Ok(PathBuf::from(profile));
        }
    }

    if let (Ok(drive), Ok(path)) = (std::env::var("HOMEDRIVE"), std::env::var("HOMEPATH")) {
        if !drive.is_empty() && !path.is_empty() {
            return Ok(PathBuf::from(format!("{}{}", drive, path)));
        }
    }

    Err("Could not determine home directory".to_string())
}

// ============================================================================
// LANTERN ROOT
// ============================================================================

/// Get the launcher home directory (~/.lantern)
pub fn get_lantern_root() -> Result<PathBuf, String> {
    if let Ok(override_home) = std::env::var("LANTERN_HOME") {
        if !override_home.is_empty() {
            return Ok(PathBuf::from(override_home));
        }
    }

    let home = get_home_dir()?;
    Ok(home.join(".lantern"))
}

/// Get the launcher config path (~/.lantern/launcher.json)
pub fn get_launcher_config_path() -> Result<PathBuf, String> {
    Ok(get_lantern_root()?.join("launcher.json"))
}

/// Private runtime cache under a launcher home
pub fn runtime_dir_in(lantern_root: &Path) -> PathBuf {
    lantern_root.join("runtime").join("node")
}

// ============================================================================
// BUNDLE
// ============================================================================

/// Candidate locations of the prebuilt server bundle, nearest first.
///
/// Linux/Windows packages put resources next to the executable, macOS app
/// bundles put them in `Contents/Resources`.
pub fn bundle_dir_candidates(exe: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(exe_dir) = exe.parent() {
        candidates.push(exe_dir.join(BUNDLE_DIR_NAME));
        candidates.push(exe_dir.join("resources").join(BUNDLE_DIR_NAME));
        if let Some(contents) = exe_dir.parent() {
            candidates.push(contents.join("Resources").join(BUNDLE_DIR_NAME));
        }
    }
    candidates
}

/// Locate the bundle shipped alongside the running launcher, if any
pub fn find_shipped_bundle_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    bundle_dir_candidates(&exe).into_iter().find(|p| p.is_dir())
}

// ============================================================================
// TESTS
// ============================================================================
