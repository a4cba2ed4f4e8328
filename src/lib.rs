//! Lantern Desktop - Main library entry point
//!
//! The launcher installs, starts and watches the Lantern local server. The
//! supervisor coordinates; the actual work is delegated to focused modules.

// ============================================================================
// MODULES
// ============================================================================

// Shared types
pub mod types;

// Error type surfaced to callers
pub mod error;

// Path helpers
pub mod paths;

// Launcher configuration (launcher.json)
pub mod config;

// Host adapters (native, WSL)
pub mod host;

// Port and process-tree management
pub mod ports;

// Node.js runtime discovery and provisioning
pub mod runtime;

// Install environments
pub mod environment;

// Subscriber fan-out
pub mod events;

// Server log buffer
pub mod logs;

// Health probing
pub mod health;

// Install progress file
pub mod install_state;

// Install pipeline
pub mod installer;

// Uninstall guard
pub mod uninstall;

// LAN URL and QR code
pub mod lan;

// Lifecycle state machine
pub mod supervisor;

#[cfg(test)]
mod tests;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::LauncherConfig;
pub use error::SupervisorError;
pub use events::Subscription;
pub use supervisor::{Supervisor, SupervisorOptions, SupervisorTimings};
pub use types::{Environment, EnvironmentId, LifecycleState, SupervisorEvent};

use health::HttpHealthProbe;
use log::info;
use std::sync::Arc;

/// Build a supervisor for this machine from `~/.lantern/launcher.json`
pub fn supervisor_from_environment() -> Result<Supervisor, SupervisorError> {
    let config = config::load_config();
    let host: Arc<dyn host::HostAdapter> = Arc::from(host::select_host(&config.distribution)?);
    let lantern_root = host.launcher_root()?;
    let probe = Arc::new(HttpHealthProbe::new(config.health_url())?);
    let bundle_dir = config
        .bundle_dir
        .clone()
        .or_else(paths::find_shipped_bundle_dir);
    let config_path = paths::get_launcher_config_path().ok();

    info!(
        "Lantern launcher using {} host, root {}",
        host.name(),
        lantern_root.display()
    );

    Ok(Supervisor::new(SupervisorOptions {
        config,
        config_path,
        lantern_root,
        host,
        probe,
        bundle_dir,
        timings: SupervisorTimings::default(),
    }))
}
