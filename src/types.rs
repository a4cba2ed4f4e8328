//! Shared data types for the Lantern supervisor
//!
//! This module contains the serializable types used across the launcher:
//! - Lifecycle state of the managed service
//! - Environment selectors and resolved environments
//! - Supervisor events pushed to subscribers
//! - Runtime distribution descriptors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Lifecycle state of the managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotInstalled,
    Stopped,
    Starting,
    Stopping,
    Running,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotInstalled => "not_installed",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Running => "running",
            LifecycleState::Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ENVIRONMENTS
// ============================================================================

/// Logical environment selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentId {
    #[default]
    Default,
    Development,
    Custom,
}

impl EnvironmentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentId::Default => "default",
            EnvironmentId::Development => "development",
            EnvironmentId::Custom => "custom",
        }
    }
}

impl std::str::FromStr for EnvironmentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(EnvironmentId::Default),
            "development" | "dev" => Ok(EnvironmentId::Development),
            "custom" => Ok(EnvironmentId::Custom),
            other => Err(format!(
                "Unknown environment '{}' (expected default, development or custom)",
                other
            )),
        }
    }
}

/// A resolved environment. Paths are in the namespace the service runs in
/// (inside WSL when the compatibility layer is in use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    pub install_root: PathBuf,
    pub service_root: PathBuf,
    pub label: String,
    /// Only set for `custom`
    pub custom_root: Option<PathBuf>,
}

/// The two roots later operations address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPaths {
    pub install_root: PathBuf,
    pub service_root: PathBuf,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events pushed to subscribers of a supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SupervisorEvent {
    StatusChanged(LifecycleState),
    LogLine(String),
    InstallProgress(String),
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Pinned runtime distribution for the current host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDistribution {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub download_url: String,
    pub local_install_dir: PathBuf,
}

impl RuntimeDistribution {
    /// Archive base name, e.g. `node-v22.12.0-linux-x64`
    pub fn archive_stem(&self) -> String {
        format!("node-v{}-{}-{}", self.version, self.platform, self.arch)
    }

    /// Path the runtime executable is expected at once provisioned
    pub fn executable_path(&self) -> PathBuf {
        self.local_install_dir.join("bin").join("node")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.local_install_dir.join("bin")
    }
}

// ============================================================================
// LAN
// ============================================================================

/// LAN address of the service plus an SVG QR code encoding it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanInfo {
    pub url: String,
    pub qr_svg: String,
}

// ============================================================================
// TESTS
// ============================================================================
