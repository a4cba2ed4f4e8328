//! Persisted install progress (`<installRoot>/.lantern.install.json`)
//!
//! Every pipeline stage is appended to a history so a failed install can be
//! explained on the next launch.

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const INSTALL_STATE_FILE: &str = ".lantern.install.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStage {
    Runtime,
    Backup,
    Fetch,
    Dependencies,
    ServiceDependencies,
    Build,
    Copy,
    Complete,
}

impl InstallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStage::Runtime => "runtime",
            InstallStage::Backup => "backup",
            InstallStage::Fetch => "fetch",
            InstallStage::Dependencies => "dependencies",
            InstallStage::ServiceDependencies => "service-dependencies",
            InstallStage::Build => "build",
            InstallStage::Copy => "copy",
            InstallStage::Complete => "complete",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    #[default]
    InProgress,
    Ok,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InstallEvent {
    pub stage: InstallStage,
    pub status: StageStatus,
    pub timestamp: String,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InstallState {
    /// `bundle` or `source`
    pub strategy: String,
    pub stage: InstallStage,
    pub status: StageStatus,
    pub updated_at: String,
    pub history: Vec<InstallEvent>,
}

fn install_state_path(install_root: &Path) -> PathBuf {
    install_root.join(INSTALL_STATE_FILE)
}

/// `install_root` is a launcher-side (filesystem) path
pub fn read_install_state(install_root: &Path) -> Option<InstallState> {
    let content = std::fs::read_to_string(install_state_path(install_root)).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_install_state(install_root: &Path, state: &InstallState) -> Result<(), String> {
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| format!("Failed to serialize install state: {}", e))?;
    std::fs::write(install_state_path(install_root), content)
        .map_err(|e| format!("Failed to write install state: {}", e))
}

/// Collects stage history for one install run.
///
/// The install root may not exist yet (or must stay empty for `git clone`),
/// so events are held in memory until `persist_from_now` is called; from then
/// on every event rewrites the file. State writes never fail an install.
pub struct InstallRecorder {
    install_root: PathBuf,
    strategy: &'static str,
    history: Vec<InstallEvent>,
    persist: bool,
}

impl InstallRecorder {
    /// `install_root` is a launcher-side (filesystem) path
    pub fn new(install_root: PathBuf, strategy: &'static str) -> Self {
        Self {
            install_root,
            strategy,
            history: Vec::new(),
            persist: false,
        }
    }

    pub fn record(&mut self, stage: InstallStage, status: StageStatus, error: Option<String>) {
        self.history.push(InstallEvent {
            stage,
            status,
            timestamp: Utc::now().to_rfc3339(),
            error,
        });
        if self.persist {
            self.flush();
        }
    }

    /// Start writing to disk, including everything recorded so far
    pub fn persist_from_now(&mut self) {
        self.persist = true;
        self.flush();
    }

    pub fn state(&self) -> Option<InstallState> {
        let last = self.history.last()?;
        Some(InstallState {
            strategy: self.strategy.to_string(),
            stage: last.stage,
            status: last.status,
            updated_at: last.timestamp.clone(),
            history: self.history.clone(),
        })
    }

    fn flush(&self) {
        let Some(state) = self.state() else {
            return;
        };
        if !self.install_root.is_dir() {
            return;
        }
        if let Err(e) = write_install_state(&self.install_root, &state) {
            warn!(
                "Failed to record install state (stage={}, status={:?}): {}",
                state.stage.as_str(),
                state.status,
                e
            );
        }
    }
}

/// Lines describing an unfinished or failed install; empty when it completed
pub fn format_install_state_lines(state: &InstallState) -> Vec<String> {
    if state.status == StageStatus::Ok && state.stage == InstallStage::Complete {
        return Vec::new();
    }

    let mut lines = vec![format!(
        "[install] last {} install stopped at stage={} status={:?} updated_at={}",
        state.strategy,
        state.stage.as_str(),
        state.status,
        state.updated_at
    )];

    if let Some(error) = state
        .history
        .iter()
        .rev()
        .find_map(|event| event.error.as_ref())
    {
        lines.push(format!("[install] error={}", error));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_recorder_holds_events_until_persisted() {
        let temp = TempDir::new().unwrap();
        let mut recorder = InstallRecorder::new(temp.path().to_path_buf(), "source");
        recorder.record(InstallStage::Runtime, StageStatus::Ok, None);
        recorder.record(InstallStage::Fetch, StageStatus::InProgress, None);
        assert!(read_install_state(temp.path()).is_none());

        recorder.persist_from_now();
        recorder.record(InstallStage::Fetch, StageStatus::Ok, None);

        let state = read_install_state(temp.path()).unwrap();
        assert_eq!(state.strategy, "source");
        assert_eq!(state.stage, InstallStage::Fetch);
        assert_eq!(state.status, StageStatus::Ok);
        assert_eq!(state.history.len(), 3);

        let raw = std::fs::read_to_string(temp.path().join(INSTALL_STATE_FILE)).unwrap();
        assert!(raw.contains("\"in-progress\""));
    }

    #[test]
    fn test_persist_into_missing_root_is_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("missing");
        let mut recorder = InstallRecorder::new(root.clone(), "bundle");
        recorder.persist_from_now();
        recorder.record(InstallStage::Copy, StageStatus::Error, Some("disk full".to_string()));
        assert!(!root.exists());
        assert_eq!(recorder.state().unwrap().status, StageStatus::Error);
    }

    #[test]
    fn test_format_lines_for_failed_stage() {
        let temp = TempDir::new().unwrap();
        let mut recorder = InstallRecorder::new(temp.path().to_path_buf(), "source");
        recorder.persist_from_now();
        recorder.record(InstallStage::ServiceDependencies, StageStatus::InProgress, None);
        recorder.record(
            InstallStage::ServiceDependencies,
            StageStatus::Error,
            Some("npm ERR! ENOTFOUND".to_string()),
        );

        let lines = format_install_state_lines(&read_install_state(temp.path()).unwrap());
        assert!(lines.iter().any(|l| l.contains("stage=service-dependencies")));
        assert!(lines.iter().any(|l| l.contains("error=npm ERR! ENOTFOUND")));
    }

    #[test]
    fn test_format_lines_skip_completed_install() {
        let mut recorder = InstallRecorder::new(PathBuf::from("/nonexistent"), "bundle");
        recorder.record(InstallStage::Complete, StageStatus::Ok, None);
        assert!(format_install_state_lines(&recorder.state().unwrap()).is_empty());
    }
}
