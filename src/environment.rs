//! Environment resolution: which install root the supervisor addresses
//!
//! - `default`     -> `<launcher root>/service`
//! - `development` -> `<launcher root>/dev-service`
//! - `custom`      -> a caller-supplied root
//!
//! The mapping is pure. Nothing here touches the disk; switching only changes
//! which paths later operations use.

use crate::types::{Environment, EnvironmentId, ResolvedPaths};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Directory name of the default install root under the launcher root
pub const DEFAULT_ROOT_NAME: &str = "service";
/// Directory name of the development install root under the launcher root
pub const DEVELOPMENT_ROOT_NAME: &str = "dev-service";

/// Path suffixes that mark a root as launcher-owned
pub const NAMESPACE_MARKERS: [&str; 2] = [".lantern/service", ".lantern/dev-service"];

/// Maps the current environment selector to concrete roots
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    lantern_root: PathBuf,
    service_dir: String,
    current: EnvironmentId,
    custom_root: Option<PathBuf>,
}

fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty() && !p.to_string_lossy().trim().is_empty())
}

impl EnvironmentResolver {
    /// `lantern_root` is the launcher home in the service namespace
    pub fn new(lantern_root: PathBuf, service_dir: impl Into<String>) -> Self {
        Self {
            lantern_root,
            service_dir: service_dir.into(),
            current: EnvironmentId::Default,
            custom_root: None,
        }
    }

    /// Restore a persisted selection. An unusable custom selection falls back to default.
    pub fn with_selection(mut self, id: EnvironmentId, custom_root: Option<PathBuf>) -> Self {
        self.custom_root = non_empty(custom_root);
        self.current = if id == EnvironmentId::Custom && self.custom_root.is_none() {
            warn!("Persisted custom environment has no root, using default");
            EnvironmentId::Default
        } else {
            id
        };
        self
    }

    /// Select an environment. Returns whether the selection changed.
    ///
    /// `custom` without a non-empty root keeps the previous custom root; with
    /// no previous custom root the call does nothing.
    pub fn set_environment(&mut self, id: EnvironmentId, custom_root: Option<PathBuf>) -> bool {
        let before = (self.current, self.custom_root.clone());

        if id == EnvironmentId::Custom {
            match non_empty(custom_root) {
                Some(root) => self.custom_root = Some(root),
                None if self.custom_root.is_some() => {}
                None => {
                    warn!("Ignoring custom environment without a root");
                    return false;
                }
            }
        }
        self.current = id;

        let changed = before != (self.current, self.custom_root.clone());
        if changed {
            info!(
                "Environment set to {} ({})",
                self.current.as_str(),
                self.install_root().display()
            );
        }
        changed
    }

    pub fn current_id(&self) -> EnvironmentId {
        self.current
    }

    pub fn custom_root(&self) -> Option<&Path> {
        self.custom_root.as_deref()
    }

    pub fn default_root(&self) -> PathBuf {
        self.lantern_root.join(DEFAULT_ROOT_NAME)
    }

    pub fn development_root(&self) -> PathBuf {
        self.lantern_root.join(DEVELOPMENT_ROOT_NAME)
    }

    fn install_root(&self) -> PathBuf {
        match (self.current, &self.custom_root) {
            (EnvironmentId::Development, _) => self.development_root(),
            (EnvironmentId::Custom, Some(root)) => root.clone(),
            _ => self.default_root(),
        }
    }

    pub fn resolve_paths(&self) -> ResolvedPaths {
        let install_root = self.install_root();
        let service_root = install_root.join(&self.service_dir);
        ResolvedPaths {
            install_root,
            service_root,
        }
    }

    pub fn current_environment(&self) -> Environment {
        let paths = self.resolve_paths();
        let label = match self.current {
            EnvironmentId::Default => "Default".to_string(),
            EnvironmentId::Development => "Development".to_string(),
            EnvironmentId::Custom => format!("Custom ({})", paths.install_root.display()),
        };
        Environment {
            id: self.current,
            install_root: paths.install_root,
            service_root: paths.service_root,
            label,
            custom_root: if self.current == EnvironmentId::Custom {
                self.custom_root.clone()
            } else {
                None
            },
        }
    }
}
