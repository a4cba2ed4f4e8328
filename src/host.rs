//! Host adapters: where the Lantern server actually runs
//!
//! The supervisor never branches on the host OS. It talks to one
//! `HostAdapter`, picked once at startup:
//! - `NativeHost` runs everything directly (macOS, Linux)
//! - `WslHost` runs the service inside a WSL distribution (Windows)
//!
//! Paths handed to an adapter are always in the namespace the service runs
//! in. `fs_path` translates them for the launcher's own filesystem calls.

use crate::ports::{self, ProcessSignal};
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

// ============================================================================
// TYPES
// ============================================================================

/// A command to run on the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-ish rendering for transcripts
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The most useful error text: stderr, else stdout, trimmed to the tail
    pub fn error_text(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.trim().lines().collect();
        let start = lines.len().saturating_sub(20);
        lines[start..].join("\n")
    }
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Process and filesystem control for one kind of host
pub trait HostAdapter: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Home directory in the service namespace
    fn home_dir(&self) -> Result<PathBuf, String>;

    /// Launcher home (`~/.lantern`) in the service namespace
    fn launcher_root(&self) -> Result<PathBuf, String> {
        Ok(self.home_dir()?.join(".lantern"))
    }

    /// PATH the host gives spawned commands before the runtime is prepended
    fn base_path(&self) -> String;

    /// Translate a service-namespace path into one the launcher can open
    fn fs_path(&self, path: &Path) -> PathBuf;

    /// Translate a user-supplied launcher path into the service namespace
    fn service_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// `(os, arch)` of the runtime distribution this host needs
    fn runtime_platform(&self) -> (&'static str, &'static str);

    /// Well-known runtime bin directories to probe, in priority order
    fn conventional_runtime_dirs(&self) -> Vec<PathBuf>;

    /// Look a program up on the host's command search path
    fn find_program<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<PathBuf>>;

    /// Run a command to completion, capturing its output
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<StepOutput, String>>;

    /// Spawn a long-running child with stdout/stderr piped
    fn spawn(&self, spec: &CommandSpec) -> Result<Child, String>;

    /// Signal a child spawned by `spawn`; `port` identifies the service inside the layer
    fn signal(&self, pid: u32, port: u16, signal: ProcessSignal);

    /// Kill whatever listens on `port`. Returns whether anything was killed.
    fn kill_port(&self, port: u16) -> bool;
}

fn collect_output(output: std::process::Output) -> StepOutput {
    StepOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

// ============================================================================
// NATIVE HOST
// ============================================================================

/// Runs the service directly on this OS
#[derive(Debug, Default)]
pub struct NativeHost;

impl NativeHost {
    pub fn new() -> Self {
        NativeHost
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Node.js OS name for downloads
pub fn get_node_os() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "darwin"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "win"
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "linux"
    }
}

/// Node.js architecture name for downloads
pub fn get_node_arch() -> &'static str {
    #[cfg(target_arch = "aarch64")]
    {
        "arm64"
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        "x64"
    }
}

impl HostAdapter for NativeHost {
    fn name(&self) -> &'static str {
        "native"
    }

    fn home_dir(&self) -> Result<PathBuf, String> {
        crate::paths::get_home_dir()
    }

    fn launcher_root(&self) -> Result<PathBuf, String> {
        crate::paths::get_lantern_root()
    }

    fn base_path(&self) -> String {
        std::env::var("PATH").unwrap_or_default()
    }

    fn fs_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    fn runtime_platform(&self) -> (&'static str, &'static str) {
        (get_node_os(), get_node_arch())
    }

    fn conventional_runtime_dirs(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/home/linuxbrew/.linuxbrew/bin"),
            PathBuf::from("/usr/bin"),
        ]
    }

    fn find_program<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<PathBuf>> {
        Box::pin(async move { which::which(name).ok() })
    }

    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<StepOutput, String>> {
        Box::pin(async move {
            debug!("[native] running {}", spec.display());
            let output = Self::command(spec)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| format!("Failed to run {}: {}", spec.program, e))?;
            Ok(collect_output(output))
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Child, String> {
        let mut cmd = Self::command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so stop() reaches grandchildren
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", spec.program, e))
    }

    fn signal(&self, pid: u32, _port: u16, signal: ProcessSignal) {
        ports::signal_process_tree(pid, signal);
    }

    fn kill_port(&self, port: u16) -> bool {
        ports::kill_port(port)
    }
}

// ============================================================================
// WSL HOST
// ============================================================================

/// Runs the service inside a WSL distribution.
///
/// Filesystem access goes through the `\\wsl.localhost\<distro>` share;
/// processes are launched through `wsl.exe --exec`.
#[derive(Debug)]
pub struct WslHost {
    distribution: String,
    home: PathBuf,
}

/// Translate a Linux path inside a distribution into its Windows UNC form
pub fn wsl_unc_path(distribution: &str, linux_path: &Path) -> PathBuf {
    let text = linux_path.to_string_lossy();
    let trimmed = text.trim_start_matches('/');
    let mut unc = format!(r"\\wsl.localhost\{}", distribution);
    for part in trimmed.split('/').filter(|p| !p.is_empty()) {
        unc.push('\\');
        unc.push_str(part);
    }
    PathBuf::from(unc)
}

/// Translate `C:\Users\me\lantern` into `/mnt/c/Users/me/lantern`.
/// Paths without a drive letter are only slash-normalized.
pub fn windows_to_wsl_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy().replace('\\', "/");
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = text[2..].trim_start_matches('/');
        if rest.is_empty() {
            return PathBuf::from(format!("/mnt/{}", drive));
        }
        return PathBuf::from(format!("/mnt/{}/{}", drive, rest));
    }
    PathBuf::from(text)
}

/// Render a path as a POSIX string regardless of the launcher OS
fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl WslHost {
    /// Connect to a distribution, reading its `$HOME` once
    pub fn connect(distribution: &str) -> Result<Self, String> {
        let output = std::process::Command::new("wsl.exe")
            .args(["-d", distribution, "--exec", "sh", "-c", "printf %s \"$HOME\""])
            .output()
            .map_err(|e| format!("Failed to run wsl.exe: {}", e))?;

        if !output.status.success() {
            return Err(format!(
                "WSL distribution '{}' is not available: {}",
                distribution,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let home = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if home.is_empty() {
            return Err(format!("Could not read $HOME inside WSL '{}'", distribution));
        }

        info!("Using WSL distribution {} (home {})", distribution, home);
        Ok(Self {
            distribution: distribution.to_string(),
            home: PathBuf::from(home),
        })
    }

    /// Build the wsl.exe invocation for a command spec
    pub fn wsl_args(&self, spec: &CommandSpec) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.distribution.clone()];
        if let Some(dir) = &spec.cwd {
            args.push("--cd".to_string());
            args.push(posix(dir));
        }
        args.push("--exec".to_string());
        if !spec.env.is_empty() {
            args.push("env".to_string());
            for (k, v) in &spec.env {
                args.push(format!("{}={}", k, v));
            }
        }
        args.push(spec.program.clone());
        args.extend(spec.args.iter().cloned());
        args
    }

    fn command(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new("wsl.exe");
        cmd.args(self.wsl_args(spec));
        cmd
    }

    fn run_inside_blocking(&self, program: &str, args: &[&str]) -> Option<std::process::Output> {
        let mut full = vec!["-d", self.distribution.as_str(), "--exec", program];
        full.extend_from_slice(args);
        std::process::Command::new("wsl.exe").args(&full).output().ok()
    }
}

impl HostAdapter for WslHost {
    fn name(&self) -> &'static str {
        "wsl"
    }

    fn home_dir(&self) -> Result<PathBuf, String> {
        Ok(self.home.clone())
    }

    fn base_path(&self) -> String {
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string()
    }

    fn fs_path(&self, path: &Path) -> PathBuf {
        wsl_unc_path(&self.distribution, path)
    }

    fn service_path(&self, path: &Path) -> PathBuf {
        windows_to_wsl_path(path)
    }

    fn runtime_platform(&self) -> (&'static str, &'static str) {
        ("linux", get_node_arch())
    }

    fn conventional_runtime_dirs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/usr/bin")]
    }

    fn find_program<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<PathBuf>> {
        Box::pin(async move {
            let spec = CommandSpec::new("sh")
                .arg("-lc")
                .arg(format!("command -v {}", name));
            match self.run(&spec).await {
                Ok(out) if out.success() => {
                    let path = out.stdout.trim().to_string();
                    if path.is_empty() {
                        None
                    } else {
                        Some(PathBuf::from(path))
                    }
                }
                _ => None,
            }
        })
    }

    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<StepOutput, String>> {
        Box::pin(async move {
            debug!("[wsl] running {}", spec.display());
            let output = self
                .command(spec)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| format!("Failed to run {} in WSL: {}", spec.program, e))?;
            Ok(collect_output(output))
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Child, String> {
        self.command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to spawn {} in WSL: {}", spec.program, e))
    }

    fn signal(&self, pid: u32, port: u16, signal: ProcessSignal) {
        // The tracked pid is wsl.exe; the server itself lives inside the layer
        let flag = match signal {
            ProcessSignal::Terminate => "-TERM",
            ProcessSignal::Kill => "-KILL",
        };
        let target = format!("{}/tcp", port);
        if self
            .run_inside_blocking("fuser", &["-k", flag, &target])
            .is_none()
        {
            warn!("[wsl] fuser unavailable, signalling wsl.exe only");
        }
        if signal == ProcessSignal::Kill {
            ports::signal_process_tree(pid, ProcessSignal::Kill);
        }
    }

    fn kill_port(&self, port: u16) -> bool {
        let target = format!("{}/tcp", port);
        self.run_inside_blocking("fuser", &["-k", "-KILL", &target])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Pick the adapter for this machine. Windows always goes through WSL.
pub fn select_host(distribution: &str) -> Result<Box<dyn HostAdapter>, String> {
    if cfg!(target_os = "windows") {
        Ok(Box::new(WslHost::connect(distribution)?))
    } else {
        Ok(Box::new(NativeHost::new()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
