//! Launcher configuration
//!
//! Loaded from ~/.lantern/launcher.json. A missing file means defaults; a
//! broken file is logged and replaced by defaults on the next save.

use crate::paths::get_launcher_config_path;
use crate::types::EnvironmentId;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_REPO_URL: &str = "https://github.com/lantern-app/lantern.git";
pub const DEFAULT_REPO_BRANCH: &str = "main";
pub const DEFAULT_SERVICE_DIR: &str = "server";
pub const DEFAULT_ENTRY_FILE: &str = "dist/index.js";
pub const DEFAULT_PORT: u16 = 3380;
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_NODE_VERSION: &str = "22.12.0";
pub const DEFAULT_NODE_MAJOR_MIN: u32 = 20;
pub const DEFAULT_NODE_MAJOR_MAX: u32 = 22;
pub const DEFAULT_WSL_DISTRIBUTION: &str = "Ubuntu";

fn default_repo_url() -> String {
    DEFAULT_REPO_URL.to_string()
}
fn default_repo_branch() -> String {
    DEFAULT_REPO_BRANCH.to_string()
}
fn default_service_dir() -> String {
    DEFAULT_SERVICE_DIR.to_string()
}
fn default_entry_file() -> String {
    DEFAULT_ENTRY_FILE.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}
fn default_node_version() -> String {
    DEFAULT_NODE_VERSION.to_string()
}
fn default_node_major_min() -> u32 {
    DEFAULT_NODE_MAJOR_MIN
}
fn default_node_major_max() -> u32 {
    DEFAULT_NODE_MAJOR_MAX
}
fn default_distribution() -> String {
    DEFAULT_WSL_DISTRIBUTION.to_string()
}

// ============================================================================
// CONFIG
// ============================================================================

/// Launcher configuration (launcher.json)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    #[serde(default = "default_repo_branch")]
    pub repo_branch: String,
    /// Service directory relative to the install root
    #[serde(default = "default_service_dir")]
    pub service_dir: String,
    /// Entry point relative to the service directory; its existence marks an install
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_node_version")]
    pub node_version: String,
    #[serde(default = "default_node_major_min")]
    pub node_major_min: u32,
    #[serde(default = "default_node_major_max")]
    pub node_major_max: u32,
    /// Override for the prebuilt bundle location
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
    /// Persisted environment selection
    #[serde(default)]
    pub environment: EnvironmentId,
    #[serde(default)]
    pub custom_root: Option<PathBuf>,
    /// WSL distribution used on Windows hosts
    #[serde(default = "default_distribution")]
    pub distribution: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            repo_url: default_repo_url(),
            repo_branch: default_repo_branch(),
            service_dir: default_service_dir(),
            entry_file: default_entry_file(),
            port: default_port(),
            health_path: default_health_path(),
            node_version: default_node_version(),
            node_major_min: default_node_major_min(),
            node_major_max: default_node_major_max(),
            bundle_dir: None,
            environment: EnvironmentId::Default,
            custom_root: None,
            distribution: default_distribution(),
        }
    }
}

impl LauncherConfig {
    /// Full health URL on the loopback interface
    pub fn health_url(&self) -> String {
        let path = if self.health_path.starts_with('/') {
            self.health_path.clone()
        } else {
            format!("/{}", self.health_path)
        };
        format!("http://localhost:{}{}", self.port, path)
    }

    pub fn accepts_node_major(&self, major: u32) -> bool {
        major >= self.node_major_min && major <= self.node_major_max
    }
}

// ============================================================================
// LOAD / SAVE
// ============================================================================

/// Load config from a specific path
pub fn load_config_from(path: &Path) -> LauncherConfig {
    if !path.exists() {
        return LauncherConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Invalid launcher config at {}: {}", path.display(), e);
                LauncherConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read launcher config at {}: {}", path.display(), e);
            LauncherConfig::default()
        }
    }
}

/// Save config to a specific path
pub fn save_config_to(path: &Path, config: &LauncherConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize launcher config: {}", e))?;
    std::fs::write(path, content)
        .map_err(|e| format!("Failed to write launcher config: {}", e))?;

    Ok(())
}

/// Load config from ~/.lantern/launcher.json
pub fn load_config() -> LauncherConfig {
    match get_launcher_config_path() {
        Ok(path) => load_config_from(&path),
        Err(_) => LauncherConfig::default(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
