//! Node.js runtime location and provisioning for Lantern
//!
//! The Lantern server needs Node within a narrow major-version window. The
//! locator looks in this order and takes the first compatible binary:
//!
//! 1. The launcher's private runtime (`~/.lantern/runtime/node/v{VERSION}-{ARCH}`)
//! 2. Platform-conventional install locations (Homebrew, /usr/local, /usr/bin)
//! 3. Version managers (NVM, fnm, Volta, asdf, mise, n, nodenv), newest first
//! 4. The host's command search path
//!
//! When nothing compatible is found, the pinned distribution is downloaded,
//! verified against the release's SHASUMS256.txt and unpacked into the
//! private directory. The archive is always removed afterwards.
//!
//! All paths here are in the service namespace; file access goes through
//! `HostAdapter::fs_path`.

use crate::config::LauncherConfig;
use crate::error::SupervisorError;
use crate::host::{CommandSpec, HostAdapter};
use crate::types::RuntimeDistribution;
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::io::AsyncWriteExt;

// ============================================================================
// TYPES
// ============================================================================

/// Where a usable Node.js was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSource {
    /// Lantern-managed runtime (~/.lantern/runtime/node/)
    Lantern,
    /// Homebrew, /usr/local or /usr/bin
    System,
    Nvm,
    Fnm,
    Volta,
    Asdf,
    Mise,
    N,
    Nodenv,
    /// Host command search path
    Path,
}

/// A compatible runtime executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRuntime {
    pub executable: PathBuf,
    pub version: Option<String>,
    pub source: NodeSource,
}

/// Discovery report for UI/CLI display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub ready: bool,
    pub path: Option<String>,
    pub version: Option<String>,
    pub source: Option<NodeSource>,
    pub pinned_version: String,
}

/// Download progress callback, called with a percentage 0..=100
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

// ============================================================================
// CONSTANTS
// ============================================================================

/// Node.js download base URL
pub const NODE_DIST_URL: &str = "https://nodejs.org/dist";

/// Env var overriding the download base URL
pub const NODE_MIRROR_ENV: &str = "LANTERN_NODE_MIRROR";

/// Version manager directories relative to home, with the source they map to
const VERSION_MANAGER_DIRS: &[(&str, NodeSource)] = &[
    (".nvm/versions/node", NodeSource::Nvm),
    (".local/share/fnm/node-versions", NodeSource::Fnm),
    (".fnm/node-versions", NodeSource::Fnm),
    (".volta/tools/image/node", NodeSource::Volta),
    (".asdf/installs/nodejs", NodeSource::Asdf),
    (".local/share/mise/installs/node", NodeSource::Mise),
    (".nodenv/versions", NodeSource::Nodenv),
];

/// `n` keeps versions outside home
const N_VERSIONS_DIR: &str = "/usr/local/n/versions/node";

// ============================================================================
// VERSION PARSING
// ============================================================================

fn version_regex() -> Option<&'static regex::Regex> {
    static RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"v?(\d+)\.(\d+)\.(\d+)").ok())
        .as_ref()
}

/// Parse `v22.12.0`, `22.12.0` or `node-v22.12.0` into (major, minor, patch)
pub fn parse_node_version(text: &str) -> Option<(u32, u32, u32)> {
    let caps = version_regex()?.captures(text.trim())?;
    Some((
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
        caps.get(3)?.as_str().parse().ok()?,
    ))
}

/// Find the expected hash for `file_name` in a SHASUMS256.txt body
pub fn parse_shasums(body: &str, file_name: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?;
        (name == file_name).then(|| hash.to_lowercase())
    })
}

/// Build the PATH for spawned steps and the service: runtime bin dir first,
/// then common locations, then the host's own PATH, deduplicated.
pub fn build_runtime_path(runtime_bin: &Path, base_path: &str) -> String {
    let mut parts: Vec<String> = vec![runtime_bin.to_string_lossy().replace('\\', "/")];

    let common = [
        "/opt/homebrew/bin",
        "/usr/local/bin",
        "/usr/bin",
        "/bin",
        "/usr/sbin",
        "/sbin",
    ];
    for path in common.iter().map(|p| p.to_string()) {
        if !parts.contains(&path) {
            parts.push(path);
        }
    }

    for part in base_path.split(':') {
        let part = part.to_string();
        if !part.is_empty() && !parts.contains(&part) {
            parts.push(part);
        }
    }

    parts.join(":")
}

// ============================================================================
// LOCATOR
// ============================================================================

/// Finds or provisions the Node.js runtime for one host
pub struct RuntimeLocator {
    host: Arc<dyn HostAdapter>,
    runtime_dir: PathBuf,
    version: String,
    major_min: u32,
    major_max: u32,
    mirror: String,
}

impl RuntimeLocator {
    /// `runtime_dir` is the private cache, e.g. `~/.lantern/runtime/node`
    pub fn new(host: Arc<dyn HostAdapter>, runtime_dir: PathBuf, config: &LauncherConfig) -> Self {
        let mirror = std::env::var(NODE_MIRROR_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| NODE_DIST_URL.to_string());

        Self {
            host,
            runtime_dir,
            version: config.node_version.clone(),
            major_min: config.node_major_min,
            major_max: config.node_major_max,
            mirror,
        }
    }

    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = mirror.into();
        self
    }

    /// Descriptor of the pinned distribution for this host
    pub fn distribution(&self) -> RuntimeDistribution {
        let (platform, arch) = self.host.runtime_platform();
        let stem = format!("node-v{}-{}-{}", self.version, platform, arch);
        RuntimeDistribution {
            version: self.version.clone(),
            platform: platform.to_string(),
            arch: arch.to_string(),
            download_url: format!(
                "{}/v{}/{}.tar.gz",
                self.mirror.trim_end_matches('/'),
                self.version,
                stem
            ),
            local_install_dir: self
                .runtime_dir
                .join(format!("v{}-{}", self.version, arch)),
        }
    }

    fn accepts(&self, version: &str) -> bool {
        parse_node_version(version)
            .map(|(major, _, _)| major >= self.major_min && major <= self.major_max)
            .unwrap_or(false)
    }

    /// Private runtime present at its derived path
    pub fn is_runtime_ready(&self) -> bool {
        let exe = self.distribution().executable_path();
        self.host.fs_path(&exe).is_file()
    }

    /// Run `node --version` and return the trimmed output if it looks valid
    async fn probe_version(&self, executable: &Path) -> Option<String> {
        let spec = CommandSpec::new(executable.to_string_lossy().to_string()).arg("--version");
        match self.host.run(&spec).await {
            Ok(out) if out.success() => {
                let version = out.stdout.trim().to_string();
                if parse_node_version(&version).is_some() {
                    Some(version)
                } else {
                    None
                }
            }
            Ok(out) => {
                // macOS Xcode stubs land here
                debug!("{} --version failed: {}", executable.display(), out.error_text());
                None
            }
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    async fn verify(&self, executable: PathBuf, source: NodeSource) -> Option<FoundRuntime> {
        if !self.host.fs_path(&executable).is_file() {
            return None;
        }
        let version = self.probe_version(&executable).await?;
        if !self.accepts(&version) {
            debug!(
                "Skipping {} ({}): outside {}..={}",
                executable.display(),
                version,
                self.major_min,
                self.major_max
            );
            return None;
        }
        Some(FoundRuntime {
            executable,
            version: Some(version),
            source,
        })
    }

    /// Version directories under a manager's root, newest first, filtered to
    /// the accepted major window by name.
    pub fn scan_version_dir(&self, versions_dir: &Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(self.host.fs_path(versions_dir)) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut versions: Vec<((u32, u32, u32), String)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let parsed = parse_node_version(&name)?;
                Some((parsed, name))
            })
            .filter(|((major, _, _), _)| *major >= self.major_min && *major <= self.major_max)
            .collect();

        versions.sort_by(|a, b| b.0.cmp(&a.0));

        let mut executables = Vec::new();
        for (_, name) in versions {
            let dir = versions_dir.join(&name);
            // Managers disagree on layout
            for bin_dir in [dir.join("bin"), dir.join("installation").join("bin"), dir.clone()] {
                let exe = bin_dir.join("node");
                if self.host.fs_path(&exe).is_file() {
                    executables.push(exe);
                    break;
                }
            }
        }
        executables
    }

    /// First compatible runtime by preference order, without provisioning
    pub async fn find_compatible(&self) -> Option<FoundRuntime> {
        if self.is_runtime_ready() {
            return Some(FoundRuntime {
                executable: self.distribution().executable_path(),
                version: Some(format!("v{}", self.version)),
                source: NodeSource::Lantern,
            });
        }

        for dir in self.host.conventional_runtime_dirs() {
            if let Some(found) = self.verify(dir.join("node"), NodeSource::System).await {
                return Some(found);
            }
        }

        let mut manager_dirs: Vec<(PathBuf, NodeSource)> = Vec::new();
        if let Ok(home) = self.host.home_dir() {
            for (rel, source) in VERSION_MANAGER_DIRS {
                manager_dirs.push((home.join(rel), *source));
            }
        }
        manager_dirs.push((PathBuf::from(N_VERSIONS_DIR), NodeSource::N));

        for (dir, source) in manager_dirs {
            for exe in self.scan_version_dir(&dir) {
                if let Some(found) = self.verify(exe, source).await {
                    return Some(found);
                }
            }
        }

        if let Some(exe) = self.host.find_program("node").await {
            if let Some(found) = self.verify(exe, NodeSource::Path).await {
                return Some(found);
            }
        }

        None
    }

    /// Path of a compatible runtime, provisioning the pinned one if needed
    pub async fn ensure_runtime(&self, on_progress: ProgressFn<'_>) -> Result<PathBuf, SupervisorError> {
        if let Some(found) = self.find_compatible().await {
            info!(
                "Using Node.js {} from {:?} ({})",
                found.version.as_deref().unwrap_or("?"),
                found.source,
                found.executable.display()
            );
            return Ok(found.executable);
        }

        info!("No compatible Node.js found, provisioning {}", self.version);
        self.provision_runtime(on_progress).await?;

        let exe = self.distribution().executable_path();
        if !self.host.fs_path(&exe).is_file() {
            return Err(SupervisorError::RuntimeUnavailable(format!(
                "provisioned runtime missing at {}",
                exe.display()
            )));
        }
        Ok(exe)
    }

    /// Download, verify and unpack the pinned distribution
    pub async fn provision_runtime(&self, on_progress: ProgressFn<'_>) -> Result<(), SupervisorError> {
        let dist = self.distribution();
        let archive_name = format!("{}.tar.gz", dist.archive_stem());
        let archive = self.runtime_dir.join(&archive_name);
        let archive_fs = self.host.fs_path(&archive);
        let install_fs = self.host.fs_path(&dist.local_install_dir);

        tokio::fs::create_dir_all(self.host.fs_path(&self.runtime_dir))
            .await
            .map_err(|e| {
                SupervisorError::DownloadFailed(format!("Failed to create runtime directory: {}", e))
            })?;

        info!("Downloading Node.js from {}", dist.download_url);
        let digest = match download_to(&dist.download_url, &archive_fs, on_progress).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&archive_fs).await;
                return Err(SupervisorError::DownloadFailed(e));
            }
        };

        if let Err(e) = self.verify_checksum(&dist, &archive_name, &digest).await {
            let _ = tokio::fs::remove_file(&archive_fs).await;
            return Err(e);
        }

        tokio::fs::create_dir_all(&install_fs).await.map_err(|e| {
            SupervisorError::ExtractFailed(format!("Failed to create install directory: {}", e))
        })?;

        let extract = CommandSpec::new("tar").args([
            "xzf".to_string(),
            archive.to_string_lossy().replace('\\', "/"),
            "-C".to_string(),
            dist.local_install_dir.to_string_lossy().replace('\\', "/"),
            "--strip-components=1".to_string(),
        ]);

        let result = self.host.run(&extract).await;
        let _ = tokio::fs::remove_file(&archive_fs).await;

        match result {
            Ok(out) if out.success() => {}
            Ok(out) => {
                let _ = tokio::fs::remove_dir_all(&install_fs).await;
                return Err(SupervisorError::ExtractFailed(out.error_text()));
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&install_fs).await;
                return Err(SupervisorError::ExtractFailed(e));
            }
        }

        if !self.host.fs_path(&dist.executable_path()).is_file() {
            let _ = tokio::fs::remove_dir_all(&install_fs).await;
            return Err(SupervisorError::ExtractFailed(
                "archive did not contain bin/node".to_string(),
            ));
        }

        info!("Node.js {} installed to {}", dist.version, dist.local_install_dir.display());
        Ok(())
    }

    async fn verify_checksum(
        &self,
        dist: &RuntimeDistribution,
        archive_name: &str,
        actual: &str,
    ) -> Result<(), SupervisorError> {
        let url = format!(
            "{}/v{}/SHASUMS256.txt",
            self.mirror.trim_end_matches('/'),
            dist.version
        );

        let body = match fetch_text(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not fetch {}: {}; skipping checksum verification", url, e);
                return Ok(());
            }
        };

        match parse_shasums(&body, archive_name) {
            Some(expected) if expected == actual => {
                debug!("Checksum verified for {}", archive_name);
                Ok(())
            }
            Some(expected) => Err(SupervisorError::DownloadFailed(format!(
                "checksum mismatch for {} (expected {}, got {})",
                archive_name, expected, actual
            ))),
            None => {
                warn!("{} not listed in SHASUMS256.txt", archive_name);
                Ok(())
            }
        }
    }

    /// Discovery report, no provisioning
    pub async fn check(&self) -> RuntimeStatus {
        let found = self.find_compatible().await;
        RuntimeStatus {
            ready: found.is_some(),
            path: found
                .as_ref()
                .map(|f| f.executable.to_string_lossy().to_string()),
            version: found.as_ref().and_then(|f| f.version.clone()),
            source: found.map(|f| f.source),
            pinned_version: self.version.clone(),
        }
    }

    /// Env for install steps and the service when running on `executable`
    pub fn runtime_env(&self, executable: &Path) -> Vec<(String, String)> {
        let bin = executable.parent().unwrap_or(executable);
        vec![(
            "PATH".to_string(),
            build_runtime_path(bin, &self.host.base_path()),
        )]
    }
}

// ============================================================================
// HTTP
// ============================================================================

fn http_client(url: &str) -> Result<reqwest::Client, String> {
    let mut builder =
        reqwest::Client::builder().user_agent(concat!("lantern/", env!("CARGO_PKG_VERSION")));
    // Local mirrors never go through a proxy
    if url.contains("://127.0.0.1") || url.contains("://localhost") {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

async fn fetch_text(url: &str) -> Result<String, String> {
    let response = http_client(url)?
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;
    response.text().await.map_err(|e| e.to_string())
}

/// Stream `url` into `dest`, reporting percentage progress. Returns the hex SHA-256.
async fn download_to(url: &str, dest: &Path, on_progress: ProgressFn<'_>) -> Result<String, String> {
    let response = http_client(url)?
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Request failed: {}", e))?
        .error_for_status()
        .map_err(|e| format!("Server returned an error: {}", e))?;

    let total = response.content_length();
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut last_pct: Option<u8> = None;

    on_progress(0);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Download interrupted: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write archive: {}", e))?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if let Some(total) = total.filter(|t| *t > 0) {
            let pct = ((downloaded.min(total) * 100) / total) as u8;
            if last_pct != Some(pct) {
                last_pct = Some(pct);
                on_progress(pct);
            }
        }
    }
    file.flush()
        .await
        .map_err(|e| format!("Failed to write archive: {}", e))?;

    if last_pct != Some(100) {
        on_progress(100);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NativeHost;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn locator(runtime_dir: PathBuf) -> RuntimeLocator {
        RuntimeLocator::new(Arc::new(NativeHost::new()), runtime_dir, &LauncherConfig::default())
    }

    #[test]
    fn test_parse_node_version() {
        assert_eq!(parse_node_version("v22.12.0\n"), Some((22, 12, 0)));
        assert_eq!(parse_node_version("20.1.3"), Some((20, 1, 3)));
        assert_eq!(parse_node_version("node-v18.0.0-linux-x64"), Some((18, 0, 0)));
        assert_eq!(parse_node_version("lts-iron"), None);
    }

    #[test]
    fn test_parse_shasums() {
        let body = "\
aaa111  node-v22.12.0-darwin-arm64.tar.gz
BBB222  node-v22.12.0-linux-x64.tar.gz
";
        assert_eq!(
            parse_shasums(body, "node-v22.12.0-linux-x64.tar.gz"),
            Some("bbb222".to_string())
        );
        assert_eq!(parse_shasums(body, "node-v22.12.0-win-x64.zip"), None);
    }

    #[test]
    fn test_build_runtime_path_puts_runtime_first() {
        let path = build_runtime_path(
            Path::new("/home/me/.lantern/runtime/node/v22.12.0-x64/bin"),
            "/usr/bin:/custom/bin:/usr/bin",
        );
        let parts: Vec<&str> = path.split(':').collect();
        assert_eq!(parts[0], "/home/me/.lantern/runtime/node/v22.12.0-x64/bin");
        assert_eq!(parts.iter().filter(|p| **p == "/usr/bin").count(), 1);
        assert!(parts.contains(&"/custom/bin"));
    }

    #[test]
    fn test_distribution_is_derived_from_config() {
        let temp = TempDir::new().unwrap();
        let loc = locator(temp.path().to_path_buf()).with_mirror("https://mirror.example/node/");
        let dist = loc.distribution();
        assert_eq!(dist.version, "22.12.0");
        assert!(dist
            .download_url
            .starts_with("https://mirror.example/node/v22.12.0/node-v22.12.0-"));
        assert!(dist.download_url.ends_with(".tar.gz"));
        assert!(dist.local_install_dir.starts_with(temp.path()));
    }

    #[tokio::test]
    async fn test_private_runtime_is_preferred() {
        let temp = TempDir::new().unwrap();
        let loc = locator(temp.path().to_path_buf());
        assert!(!loc.is_runtime_ready());

        let exe = loc.distribution().executable_path();
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, "").unwrap();

        assert!(loc.is_runtime_ready());
        let found = loc.find_compatible().await.unwrap();
        assert_eq!(found.source, NodeSource::Lantern);
        assert_eq!(found.executable, exe);

        let noop = |_: u8| {};
        assert_eq!(loc.ensure_runtime(&noop).await.unwrap(), exe);
    }

    #[test]
    fn test_scan_version_dir_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        let versions = temp.path().join("versions");
        for (name, layout) in [
            ("v18.20.0", "bin"),
            ("v20.11.1", "bin"),
            ("v22.3.0", "installation/bin"),
            ("v22.12.0", "bin"),
            ("v23.1.0", "bin"),
        ] {
            let bin = versions.join(name).join(layout);
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("node"), "").unwrap();
        }
        std::fs::create_dir_all(versions.join("lts-iron")).unwrap();

        let loc = locator(temp.path().join("runtime"));
        let found = loc.scan_version_dir(&versions);
        assert_eq!(
            found,
            vec![
                versions.join("v22.12.0/bin/node"),
                versions.join("v22.3.0/installation/bin/node"),
                versions.join("v20.11.1/bin/node"),
            ]
        );
    }

    #[test]
    fn test_scan_missing_version_dir() {
        let temp = TempDir::new().unwrap();
        let loc = locator(temp.path().to_path_buf());
        assert!(loc.scan_version_dir(&temp.path().join("nope")).is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let runtime_dir = temp.path().join("runtime");
        let loc = locator(runtime_dir.clone()).with_mirror("http://127.0.0.1:1");

        let noop = |_: u8| {};
        let err = loc.provision_runtime(&noop).await.unwrap_err();
        assert_eq!(err.code(), "DOWNLOAD_FAILED");
        assert!(!loc.is_runtime_ready());
        let leftovers: Vec<_> = std::fs::read_dir(&runtime_dir).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    fn make_fake_distribution(temp: &Path, stem: &str) -> Vec<u8> {
        use std::os::unix::fs::PermissionsExt;

        let staging = temp.join("staging");
        let bin = staging.join(stem).join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let node = bin.join("node");
        std::fs::write(&node, "#!/bin/sh\necho v22.12.0\n").unwrap();
        std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o755)).unwrap();

        let archive = temp.join("dist.tar.gz");
        let status = std::process::Command::new("tar")
            .args(["czf", archive.to_str().unwrap(), "-C", staging.to_str().unwrap(), stem])
            .status()
            .unwrap();
        assert!(status.success());
        std::fs::read(&archive).unwrap()
    }

    #[cfg(unix)]
    async fn serve_distribution(
        version: &str,
        archive_name: &str,
        archive: Vec<u8>,
        shasums: String,
    ) -> String {
        use axum::routing::get;

        let app = axum::Router::new()
            .route(
                &format!("/v{}/{}", version, archive_name),
                get(move || {
                    let body = archive.clone();
                    async move { body }
                }),
            )
            .route(
                &format!("/v{}/SHASUMS256.txt", version),
                get(move || {
                    let body = shasums.clone();
                    async move { body }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provision_runtime_downloads_verifies_and_extracts() {
        let temp = TempDir::new().unwrap();
        let runtime_dir = temp.path().join("runtime");
        let probe = locator(runtime_dir.clone());
        let stem = probe.distribution().archive_stem();
        let archive_name = format!("{}.tar.gz", stem);

        let archive = make_fake_distribution(temp.path(), &stem);
        let hash = format!("{:x}", Sha256::digest(&archive));
        let shasums = format!("{}  {}\n", hash, archive_name);
        let base = serve_distribution("22.12.0", &archive_name, archive, shasums).await;

        let loc = locator(runtime_dir.clone()).with_mirror(base);
        let seen = Mutex::new(Vec::new());
        let record = |pct: u8| seen.lock().unwrap().push(pct);
        loc.provision_runtime(&record).await.unwrap();

        assert!(loc.is_runtime_ready());
        assert!(!runtime_dir.join(&archive_name).exists());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));

        let status = loc.check().await;
        assert!(status.ready);
        assert_eq!(status.source, Some(NodeSource::Lantern));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_provision_runtime_rejects_checksum_mismatch() {
        let temp = TempDir::new().unwrap();
        let runtime_dir = temp.path().join("runtime");
        let probe = locator(runtime_dir.clone());
        let stem = probe.distribution().archive_stem();
        let archive_name = format!("{}.tar.gz", stem);

        let archive = make_fake_distribution(temp.path(), &stem);
        let shasums = format!("{}  {}\n", "0".repeat(64), archive_name);
        let base = serve_distribution("22.12.0", &archive_name, archive, shasums).await;

        let loc = locator(runtime_dir.clone()).with_mirror(base);
        let noop = |_: u8| {};
        let err = loc.provision_runtime(&noop).await.unwrap_err();
        assert_eq!(err.code(), "DOWNLOAD_FAILED");
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(!runtime_dir.join(&archive_name).exists());
        assert!(!loc.is_runtime_ready());
    }
}
