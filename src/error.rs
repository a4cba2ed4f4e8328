//! Supervisor error taxonomy
//!
//! Every public supervisor operation returns `SupervisorError`. Internal helpers
//! keep returning `Result<T, String>` and are lifted into `Io` via `From`.

use crate::types::LifecycleState;

/// Errors surfaced by supervisor operations
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Lantern server is not installed")]
    NotInstalled,

    #[error("No compatible Node.js runtime available: {0}")]
    RuntimeUnavailable(String),

    #[error("Runtime download failed: {0}")]
    DownloadFailed(String),

    #[error("Runtime extraction failed: {0}")]
    ExtractFailed(String),

    #[error("git is required to install from source but was not found")]
    GitMissing,

    #[error("Install step '{step}' failed with exit code {exit_code:?}: {stderr}")]
    StepFailed {
        step: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to start Lantern server: {0}")]
    SpawnFailed(String),

    #[error("Lantern server did not become ready within {0} seconds")]
    ReadinessTimeout(u64),

    #[error("Lantern server exited during startup ({0})")]
    ExitedDuringStartup(String),

    #[error("Refusing to uninstall {0}: not a Lantern install root")]
    UnsafeUninstallPath(String),

    #[error("Another {0} operation is already in progress")]
    Busy(&'static str),

    #[error("Lantern server is {0}; stop it first")]
    ServiceRunning(LifecycleState),

    #[error("{0}")]
    Io(String),
}

impl From<String> for SupervisorError {
    fn from(message: String) -> Self {
        SupervisorError::Io(message)
    }
}

impl SupervisorError {
    /// Machine readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInstalled => "NOT_INSTALLED",
            Self::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            Self::DownloadFailed(_) => "DOWNLOAD_FAILED",
            Self::ExtractFailed(_) => "EXTRACT_FAILED",
            Self::GitMissing => "GIT_MISSING",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::ReadinessTimeout(_) => "READINESS_TIMEOUT",
            Self::ExitedDuringStartup(_) => "EXITED_DURING_STARTUP",
            Self::UnsafeUninstallPath(_) => "UNSAFE_UNINSTALL_PATH",
            Self::Busy(_) => "BUSY",
            Self::ServiceRunning(_) => "SERVICE_RUNNING",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// What the user can do about it, for causes rooted in the host
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::GitMissing => Some(
                "Install git (https://git-scm.com/downloads) or use a Lantern build that ships the prebuilt server bundle, then retry the install.",
            ),
            Self::RuntimeUnavailable(_) => Some(
                "Install Node.js 20, 21 or 22 (https://nodejs.org), or let Lantern download its own runtime by retrying with network access.",
            ),
            Self::DownloadFailed(_) => Some(
                "Check your network connection or set LANTERN_NODE_MIRROR to a reachable Node.js mirror, then retry.",
            ),
            Self::ExtractFailed(_) => Some(
                "Make sure `tar` is available and the launcher home has free disk space, then retry.",
            ),
            Self::NotInstalled => Some("Run the install first."),
            Self::ServiceRunning(_) => Some("Stop the server before retrying."),
            _ => None,
        }
    }

    /// Message plus remediation hint, for display
    pub fn user_message(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{} ({})", self, hint),
            None => self.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "errorCode": self.code(),
            "remediation": self.remediation(),
        })
    }
}
