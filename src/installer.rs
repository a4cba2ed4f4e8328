//! Install pipeline for the Lantern server
//!
//! Two strategies:
//! - **bundle**: a prebuilt server shipped next to the launcher is copied
//!   into place. No git, no network beyond runtime provisioning.
//! - **source**: clone (or fast-forward an existing checkout), install
//!   top-level deps with `--ignore-scripts`, install the server's own deps,
//!   build.
//!
//! Steps run strictly in order and the first failure aborts the pipeline.
//! Nothing is rolled back; rerunning `install` is the recovery path.

use crate::config::LauncherConfig;
use crate::error::SupervisorError;
use crate::host::{CommandSpec, HostAdapter};
use crate::install_state::{InstallRecorder, InstallStage, StageStatus};
use crate::runtime::RuntimeLocator;
use crate::types::ResolvedPaths;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Progress sink for human-readable step labels
pub type InstallProgressFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Entries copied from `<bundle>/<serviceDir>` into the service root
const BUNDLE_SERVICE_ITEMS: &[(&str, bool)] = &[
    ("dist", true),
    ("public", false),
    ("node_modules", true),
    ("package.json", true),
];

/// Entries copied from `<bundle>` into the install root
const BUNDLE_ROOT_ITEMS: &[(&str, bool)] = &[("config", false)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStrategy {
    /// Launcher-side path of the prebuilt bundle
    Bundle(PathBuf),
    Source,
}

impl InstallStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStrategy::Bundle(_) => "bundle",
            InstallStrategy::Source => "source",
        }
    }
}

/// Whether the installed marker (`<serviceRoot>/<entryFile>`) exists
pub fn is_installed(host: &dyn HostAdapter, paths: &ResolvedPaths, config: &LauncherConfig) -> bool {
    host.fs_path(&paths.service_root.join(&config.entry_file))
        .is_file()
}

/// A bundle is usable when it carries the compiled server
pub fn usable_bundle(bundle_dir: Option<&Path>, config: &LauncherConfig) -> Option<PathBuf> {
    let dir = bundle_dir?;
    let entry = dir.join(&config.service_dir).join(&config.entry_file);
    if entry.is_file() {
        Some(dir.to_path_buf())
    } else {
        None
    }
}

// ============================================================================
// FILESYSTEM HELPERS
// ============================================================================

fn backup_name(dir_name: &str, stamp: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{}.backup-{}", dir_name, stamp)
    } else {
        format!("{}.backup-{}-{}", dir_name, stamp, attempt)
    }
}

/// Move an existing directory aside to a timestamped sibling.
/// Returns the backup path, or `None` when there was nothing worth keeping.
pub fn backup_existing_dir(dir: &Path) -> Result<Option<PathBuf>, String> {
    if !dir.exists() {
        return Ok(None);
    }

    let is_empty_dir = std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty_dir {
        std::fs::remove_dir(dir)
            .map_err(|e| format!("Failed to remove empty directory {}: {}", dir.display(), e))?;
        return Ok(None);
    }

    let parent = dir
        .parent()
        .ok_or_else(|| format!("{} has no parent directory", dir.display()))?;
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("service");
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();

    for attempt in 0..100 {
        let candidate = parent.join(backup_name(dir_name, &stamp, attempt));
        if candidate.exists() {
            continue;
        }
        std::fs::rename(dir, &candidate).map_err(|e| {
            format!(
                "Failed to back up {} to {}: {}",
                dir.display(),
                candidate.display(),
                e
            )
        })?;
        return Ok(Some(candidate));
    }

    Err(format!("No free backup name next to {}", dir.display()))
}

/// Recursively copy `src` to `dst`, replacing files that already exist
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64, String> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        std::fs::copy(src, dst)
            .map_err(|e| format!("Failed to copy {}: {}", src.display(), e))?;
        return Ok(1);
    }

    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| format!("Failed to read bundle: {}", e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| format!("Bad bundle path {}: {}", entry.path().display(), e))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| format!("Failed to create {}: {}", target.display(), e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| format!("Failed to copy {}: {}", entry.path().display(), e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), String> {
    let link = std::fs::read_link(src)
        .map_err(|e| format!("Failed to read link {}: {}", src.display(), e))?;
    if dst.symlink_metadata().is_ok() {
        let _ = std::fs::remove_file(dst);
    }
    std::os::unix::fs::symlink(&link, dst)
        .map_err(|e| format!("Failed to link {}: {}", dst.display(), e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), String> {
    // node_modules/.bin shims; the copy is enough for `node dist/index.js`
    std::fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| format!("Failed to copy {}: {}", src.display(), e))
}

/// Copy the bundle's server and config into place. Returns the copied entry names.
pub fn copy_bundle(
    bundle: &Path,
    service_dir: &str,
    install_root_fs: &Path,
    service_root_fs: &Path,
) -> Result<Vec<String>, String> {
    let mut copied = Vec::new();
    let bundle_service = bundle.join(service_dir);

    for (name, required) in BUNDLE_SERVICE_ITEMS {
        let src = bundle_service.join(name);
        if !src.exists() {
            if *required {
                return Err(format!("Bundle is missing {}/{}", service_dir, name));
            }
            continue;
        }
        copy_tree(&src, &service_root_fs.join(name))?;
        copied.push(format!("{}/{}", service_dir, name));
    }

    for (name, required) in BUNDLE_ROOT_ITEMS {
        let src = bundle.join(name);
        if !src.exists() {
            if *required {
                return Err(format!("Bundle is missing {}", name));
            }
            continue;
        }
        copy_tree(&src, &install_root_fs.join(name))?;
        copied.push(name.to_string());
    }

    Ok(copied)
}

/// Compare remote URLs, ignoring a trailing `/` or `.git`
pub fn same_repository(a: &str, b: &str) -> bool {
    fn normalize(url: &str) -> &str {
        let url = url.trim().trim_end_matches('/');
        url.strip_suffix(".git").unwrap_or(url)
    }
    normalize(a) == normalize(b)
}

fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Installer<'a> {
    host: &'a dyn HostAdapter,
    runtime: &'a RuntimeLocator,
    config: &'a LauncherConfig,
    paths: ResolvedPaths,
    bundle_dir: Option<PathBuf>,
    progress: InstallProgressFn<'a>,
}

impl<'a> Installer<'a> {
    pub fn new(
        host: &'a dyn HostAdapter,
        runtime: &'a RuntimeLocator,
        config: &'a LauncherConfig,
        paths: ResolvedPaths,
        bundle_dir: Option<PathBuf>,
        progress: InstallProgressFn<'a>,
    ) -> Self {
        Self {
            host,
            runtime,
            config,
            paths,
            bundle_dir,
            progress,
        }
    }

    pub fn strategy(&self) -> InstallStrategy {
        match usable_bundle(self.bundle_dir.as_deref(), self.config) {
            Some(bundle) => InstallStrategy::Bundle(bundle),
            None => InstallStrategy::Source,
        }
    }

    fn report(&self, message: &str) {
        info!("[install] {}", message);
        (self.progress)(message);
    }

    /// Run the whole pipeline. Returns the runtime executable it installed with.
    pub async fn install(&self) -> Result<PathBuf, SupervisorError> {
        let strategy = self.strategy();
        let install_root_fs = self.host.fs_path(&self.paths.install_root);
        let mut recorder = InstallRecorder::new(install_root_fs.clone(), strategy.as_str());

        let result = match &strategy {
            InstallStrategy::Bundle(bundle) => self.install_from_bundle(bundle, &mut recorder).await,
            InstallStrategy::Source => self.install_from_source(&mut recorder).await,
        };

        match &result {
            Ok(_) => {
                recorder.record(InstallStage::Complete, StageStatus::Ok, None);
                self.report("Install complete");
            }
            Err(e) => self.report(&format!("Install failed: {}", e.user_message())),
        }
        result
    }

    async fn ensure_runtime(&self, recorder: &mut InstallRecorder) -> Result<PathBuf, SupervisorError> {
        self.report("Checking Node.js runtime");
        recorder.record(InstallStage::Runtime, StageStatus::InProgress, None);

        let on_pct = |pct: u8| (self.progress)(&format!("Downloading Node.js {}%", pct));
        match self.runtime.ensure_runtime(&on_pct).await {
            Ok(exe) => {
                recorder.record(InstallStage::Runtime, StageStatus::Ok, None);
                self.report(&format!("Using Node.js at {}", exe.display()));
                Ok(exe)
            }
            Err(e) => {
                recorder.record(InstallStage::Runtime, StageStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn back_up_root(&self, recorder: &mut InstallRecorder) -> Result<(), SupervisorError> {
        let root_fs = self.host.fs_path(&self.paths.install_root);
        recorder.record(InstallStage::Backup, StageStatus::InProgress, None);
        match backup_existing_dir(&root_fs) {
            Ok(Some(backup)) => {
                recorder.record(InstallStage::Backup, StageStatus::Ok, None);
                self.report(&format!(
                    "Moved existing {} to {}",
                    root_fs.display(),
                    backup.display()
                ));
                Ok(())
            }
            Ok(None) => {
                recorder.record(InstallStage::Backup, StageStatus::Ok, None);
                Ok(())
            }
            Err(e) => {
                recorder.record(InstallStage::Backup, StageStatus::Error, Some(e.clone()));
                Err(SupervisorError::Io(e))
            }
        }
    }

    async fn run_step(
        &self,
        recorder: &mut InstallRecorder,
        stage: InstallStage,
        label: &str,
        spec: CommandSpec,
    ) -> Result<(), SupervisorError> {
        self.report(label);
        recorder.record(stage, StageStatus::InProgress, None);

        let fail = |recorder: &mut InstallRecorder, exit_code: Option<i32>, stderr: String| {
            recorder.record(stage, StageStatus::Error, Some(stderr.clone()));
            SupervisorError::StepFailed {
                step: stage.as_str().to_string(),
                exit_code,
                stderr,
            }
        };

        let output = match self.host.run(&spec).await {
            Ok(output) => output,
            Err(e) => return Err(fail(recorder, None, e)),
        };

        if !output.success() {
            let text = output.error_text();
            self.report(&format!("{} failed (exit {:?})", label, output.exit_code));
            return Err(fail(recorder, output.exit_code, text));
        }

        recorder.record(stage, StageStatus::Ok, None);
        Ok(())
    }

    fn npm_spec(&self, runtime_exe: &Path) -> CommandSpec {
        let npm = runtime_exe
            .parent()
            .map(|bin| bin.join("npm"))
            .filter(|npm| self.host.fs_path(npm).is_file())
            .map(|npm| posix(&npm))
            .unwrap_or_else(|| "npm".to_string());

        let mut spec = CommandSpec::new(npm);
        for (k, v) in self.runtime.runtime_env(runtime_exe) {
            spec = spec.env(k, v);
        }
        spec
    }

    /// Whether the install root is a checkout of the configured repository.
    /// A checkout of anything else is treated like any unrecognized directory.
    async fn is_own_checkout(&self, git: &Path, root_fs: &Path) -> bool {
        if !root_fs.join(".git").is_dir() {
            return false;
        }
        let spec = CommandSpec::new(posix(git))
            .args(["remote", "get-url", "origin"])
            .cwd(self.paths.install_root.clone());
        match self.host.run(&spec).await {
            Ok(output) if output.success() => {
                let origin = output.stdout.trim();
                if same_repository(origin, &self.config.repo_url) {
                    true
                } else {
                    warn!(
                        "{} is a checkout of {}, not {}",
                        root_fs.display(),
                        origin,
                        self.config.repo_url
                    );
                    false
                }
            }
            Ok(output) => {
                warn!("No origin remote in {}: {}", root_fs.display(), output.error_text());
                false
            }
            Err(e) => {
                warn!("Failed to read origin of {}: {}", root_fs.display(), e);
                false
            }
        }
    }

    async fn install_from_source(&self, recorder: &mut InstallRecorder) -> Result<PathBuf, SupervisorError> {
        self.report("Installing Lantern server from source");

        let git = self
            .host
            .find_program("git")
            .await
            .ok_or(SupervisorError::GitMissing)?;

        let runtime_exe = self.ensure_runtime(recorder).await?;

        let root = &self.paths.install_root;
        let root_fs = self.host.fs_path(root);

        if self.is_own_checkout(&git, &root_fs).await {
            recorder.persist_from_now();
            let pull = CommandSpec::new(posix(&git))
                .args(["pull", "--ff-only"])
                .cwd(root.clone());
            self.run_step(recorder, InstallStage::Fetch, "Updating existing checkout", pull)
                .await?;
        } else {
            self.back_up_root(recorder)?;
            if let Some(parent) = root_fs.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
            }
            let clone = CommandSpec::new(posix(&git)).args([
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                self.config.repo_branch.clone(),
                self.config.repo_url.clone(),
                posix(root),
            ]);
            let label = format!("Cloning {} ({})", self.config.repo_url, self.config.repo_branch);
            self.run_step(recorder, InstallStage::Fetch, &label, clone).await?;
            recorder.persist_from_now();
        }

        let deps = self
            .npm_spec(&runtime_exe)
            .args(["install", "--ignore-scripts"])
            .cwd(root.clone());
        self.run_step(recorder, InstallStage::Dependencies, "Installing dependencies", deps)
            .await?;

        let service_deps = self
            .npm_spec(&runtime_exe)
            .arg("install")
            .cwd(self.paths.service_root.clone());
        self.run_step(
            recorder,
            InstallStage::ServiceDependencies,
            "Installing server dependencies",
            service_deps,
        )
        .await?;

        let build = self
            .npm_spec(&runtime_exe)
            .args(["run", "build"])
            .cwd(self.paths.service_root.clone());
        self.run_step(recorder, InstallStage::Build, "Building server", build)
            .await?;

        if !is_installed(self.host, &self.paths, self.config) {
            let message = format!(
                "build finished but {} is missing",
                self.paths.service_root.join(&self.config.entry_file).display()
            );
            recorder.record(InstallStage::Build, StageStatus::Error, Some(message.clone()));
            return Err(SupervisorError::StepFailed {
                step: InstallStage::Build.as_str().to_string(),
                exit_code: Some(0),
                stderr: message,
            });
        }

        Ok(runtime_exe)
    }

    async fn install_from_bundle(
        &self,
        bundle: &Path,
        recorder: &mut InstallRecorder,
    ) -> Result<PathBuf, SupervisorError> {
        self.report(&format!("Installing Lantern server from bundle {}", bundle.display()));

        let runtime_exe = self.ensure_runtime(recorder).await?;

        let root_fs = self.host.fs_path(&self.paths.install_root);
        let recognized = root_fs.join(".lantern.install.json").is_file()
            || is_installed(self.host, &self.paths, self.config);
        if recognized {
            self.report("Updating existing install in place");
        } else {
            self.back_up_root(recorder)?;
        }

        let service_fs = self.host.fs_path(&self.paths.service_root);
        std::fs::create_dir_all(&service_fs)
            .map_err(|e| format!("Failed to create {}: {}", service_fs.display(), e))?;
        recorder.persist_from_now();

        self.report("Copying server files");
        recorder.record(InstallStage::Copy, StageStatus::InProgress, None);

        let bundle = bundle.to_path_buf();
        let service_dir = self.config.service_dir.clone();
        let root_for_copy = root_fs.clone();
        let copy = tokio::task::spawn_blocking(move || {
            copy_bundle(&bundle, &service_dir, &root_for_copy, &service_fs)
        })
        .await
        .map_err(|e| format!("Copy task failed: {}", e))
        .and_then(|r| r);

        match copy {
            Ok(items) => {
                for item in &items {
                    self.report(&format!("Copied {}", item));
                }
                recorder.record(InstallStage::Copy, StageStatus::Ok, None);
            }
            Err(e) => {
                warn!("Bundle copy failed: {}", e);
                recorder.record(InstallStage::Copy, StageStatus::Error, Some(e.clone()));
                return Err(SupervisorError::StepFailed {
                    step: InstallStage::Copy.as_str().to_string(),
                    exit_code: None,
                    stderr: e,
                });
            }
        }

        Ok(runtime_exe)
    }
}

// ============================================================================
// TESTS
// ============================================================================
