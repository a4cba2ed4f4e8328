//! Lantern server supervisor
//!
//! Owns the lifecycle state of the one managed server process:
//!
//! ```text
//! NotInstalled --install--> Stopped --start--> Starting --ready--> Running
//!                              ^                   |                  |
//!                              |                timeout             stop / exit
//!                              |                   v                  |
//!                              +------stop------ Error <--------------+
//! ```
//!
//! - `start` spawns the server directly and polls `/health` until ready
//! - a child that exits on its own forces `Stopped`, whatever else is going on
//! - `stop` never fails and ends in `Stopped` (or `NotInstalled` with no install); it is the recovery primitive
//! - only one start/restart/install/uninstall runs at a time; a second one is
//!   rejected with `Busy` rather than queued
//!
//! Every transition is published as `SupervisorEvent::StatusChanged` in the
//! order it happens.

use crate::config::{save_config_to, LauncherConfig};
use crate::environment::EnvironmentResolver;
use crate::error::SupervisorError;
use crate::events::{EventBus, Subscription};
use crate::health::{wait_until_ready, HealthProbe, PollTimings, Readiness};
use crate::host::{CommandSpec, HostAdapter};
use crate::install_state::{format_install_state_lines, read_install_state};
use crate::installer::{self, Installer};
use crate::lan;
use crate::logs::LogSink;
use crate::ports::ProcessSignal;
use crate::runtime::{RuntimeLocator, RuntimeStatus};
use crate::types::{Environment, EnvironmentId, LanInfo, LifecycleState, ResolvedPaths, SupervisorEvent};
use crate::uninstall::{is_recognized_root, remove_install_root};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;

/// Grace period between SIGTERM and SIGKILL
pub const STOP_GRACE: Duration = Duration::from_secs(3);
/// Pause between stop and start during restart
pub const RESTART_SETTLE: Duration = Duration::from_secs(1);

/// Timing knobs; defaults are the production values
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    pub readiness: PollTimings,
    pub stop_grace: Duration,
    pub restart_settle: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            readiness: PollTimings::default(),
            stop_grace: STOP_GRACE,
            restart_settle: RESTART_SETTLE,
        }
    }
}

/// Everything a supervisor needs, supplied explicitly
pub struct SupervisorOptions {
    pub config: LauncherConfig,
    /// Where environment changes are persisted; `None` keeps them in memory
    pub config_path: Option<PathBuf>,
    /// Launcher home in the service namespace
    pub lantern_root: PathBuf,
    pub host: Arc<dyn HostAdapter>,
    pub probe: Arc<dyn HealthProbe>,
    /// Launcher-side path of a prebuilt server bundle
    pub bundle_dir: Option<PathBuf>,
    pub timings: SupervisorTimings,
}

// ============================================================================
// SHARED STATE
// ============================================================================

/// The one tracked child
struct Tracked {
    pid: u32,
    generation: u64,
    /// Becomes `Some(description)` once the child has exited
    exited: watch::Receiver<Option<String>>,
}

impl Tracked {
    fn is_alive(&self) -> bool {
        self.exited.borrow().is_none()
    }
}

struct Inner {
    state: LifecycleState,
    tracked: Option<Tracked>,
    next_generation: u64,
}

/// State reachable from the child monitor tasks
struct Shared {
    inner: Mutex<Inner>,
    events: EventBus<SupervisorEvent>,
    logs: LogSink,
}

impl Shared {
    fn state(&self) -> LifecycleState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(LifecycleState::Error)
    }

    /// Record a transition and publish it, in order, if it changed anything
    fn set_state(&self, next: LifecycleState) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == next {
                return;
            }
            info!("Lantern server: {} -> {}", inner.state, next);
            inner.state = next;
            self.events.publish(SupervisorEvent::StatusChanged(next));
        }
    }

    /// Store a line; the sink publishes it as `LogLine`
    fn log(&self, line: &str) {
        self.logs.append(line);
    }

    fn live_pid(&self) -> Option<u32> {
        let inner = self.inner.lock().ok()?;
        inner
            .tracked
            .as_ref()
            .filter(|t| t.is_alive())
            .map(|t| t.pid)
    }

    /// Remove the tracked child if it is still `generation`
    fn take_tracked(&self, generation: Option<u64>) -> Option<Tracked> {
        let mut inner = self.inner.lock().ok()?;
        let superseded = match (generation, inner.tracked.as_ref()) {
            (Some(gen), Some(t)) => t.generation != gen,
            _ => false,
        };
        if superseded {
            return None;
        }
        inner.tracked.take()
    }

    /// Move to `Running` only if `generation` is still tracked and alive.
    /// Checked and applied under one lock so a concurrent exit cannot be
    /// overwritten.
    fn promote_running(&self, generation: u64) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        let alive = inner
            .tracked
            .as_ref()
            .map(|t| t.generation == generation && t.is_alive())
            .unwrap_or(false);
        if !alive {
            return false;
        }
        if inner.state != LifecycleState::Running {
            info!("Lantern server: {} -> {}", inner.state, LifecycleState::Running);
            inner.state = LifecycleState::Running;
            self.events
                .publish(SupervisorEvent::StatusChanged(LifecycleState::Running));
        }
        true
    }

    /// Called by the monitor when the child exits on its own
    fn on_child_exit(&self, generation: u64, description: &str) {
        let was_tracked = match self.inner.lock() {
            Ok(mut inner) => {
                let matches = inner
                    .tracked
                    .as_ref()
                    .map(|t| t.generation == generation)
                    .unwrap_or(false);
                if matches {
                    inner.tracked = None;
                }
                matches
            }
            Err(_) => false,
        };

        if was_tracked {
            warn!("Lantern server exited unexpectedly ({})", description);
            self.log(&format!("Lantern server exited ({})", description));
            self.set_state(LifecycleState::Stopped);
        } else {
            info!("Lantern server process finished ({})", description);
        }
    }
}

fn describe_exit(status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                return format!("exit code {}", code);
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("signal {}", signal);
                }
            }
            "terminated".to_string()
        }
        Err(e) => format!("wait failed: {}", e),
    }
}

fn forward_lines<R>(reader: R, shared: Arc<Shared>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            shared.log(&line);
        }
    })
}

/// Wait for a tracked child's exit notification
async fn wait_exited(mut exited: watch::Receiver<Option<String>>) {
    while exited.borrow().is_none() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

fn posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ============================================================================
// SUPERVISOR
// ============================================================================

pub struct Supervisor {
    config: LauncherConfig,
    config_path: Option<PathBuf>,
    host: Arc<dyn HostAdapter>,
    probe: Arc<dyn HealthProbe>,
    runtime: RuntimeLocator,
    resolver: Mutex<EnvironmentResolver>,
    shared: Arc<Shared>,
    op_lock: tokio::sync::Mutex<()>,
    bundle_dir: Option<PathBuf>,
    timings: SupervisorTimings,
}

impl Supervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let SupervisorOptions {
            config,
            config_path,
            lantern_root,
            host,
            probe,
            bundle_dir,
            timings,
        } = options;

        let custom_root = config
            .custom_root
            .as_deref()
            .map(|p| host.service_path(p));
        let resolver = EnvironmentResolver::new(lantern_root.clone(), config.service_dir.clone())
            .with_selection(config.environment, custom_root);
        let runtime = RuntimeLocator::new(
            host.clone(),
            crate::paths::runtime_dir_in(&lantern_root),
            &config,
        );

        let events = EventBus::new();
        let logs = {
            let events = events.clone();
            LogSink::new().on_append(move |line| {
                events.publish(SupervisorEvent::LogLine(line.to_string()))
            })
        };

        let installed = installer::is_installed(host.as_ref(), &resolver.resolve_paths(), &config);
        let initial = if installed {
            LifecycleState::Stopped
        } else {
            LifecycleState::NotInstalled
        };

        Self {
            config,
            config_path,
            host,
            probe,
            runtime,
            resolver: Mutex::new(resolver),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: initial,
                    tracked: None,
                    next_generation: 1,
                }),
                events,
                logs,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            bundle_dir,
            timings,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Subscribe to status, log and install events from now on
    pub fn subscribe(&self) -> Subscription<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    /// Last state this supervisor transitioned to
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn resolve_paths(&self) -> ResolvedPaths {
        match self.resolver.lock() {
            Ok(resolver) => resolver.resolve_paths(),
            Err(poisoned) => poisoned.into_inner().resolve_paths(),
        }
    }

    pub fn get_environment(&self) -> Environment {
        match self.resolver.lock() {
            Ok(resolver) => resolver.current_environment(),
            Err(poisoned) => poisoned.into_inner().current_environment(),
        }
    }

    pub fn is_installed(&self) -> bool {
        installer::is_installed(self.host.as_ref(), &self.resolve_paths(), &self.config)
    }

    /// Live status. Never changes state.
    ///
    /// Not installed is answered from the marker alone. Otherwise a passing
    /// health probe means `Running`, a live tracked child means `Starting`,
    /// anything else `Stopped`.
    pub async fn get_status(&self) -> LifecycleState {
        if !self.is_installed() {
            return LifecycleState::NotInstalled;
        }
        if self.probe.probe().await {
            return LifecycleState::Running;
        }
        if self.shared.live_pid().is_some() {
            LifecycleState::Starting
        } else {
            LifecycleState::Stopped
        }
    }

    /// The last `lines` log lines, oldest first
    pub fn get_logs(&self, lines: usize) -> Vec<String> {
        self.shared.logs.tail(lines)
    }

    /// PID of the tracked child while it is alive
    pub fn tracked_pid(&self) -> Option<u32> {
        self.shared.live_pid()
    }

    pub async fn runtime_status(&self) -> RuntimeStatus {
        self.runtime.check().await
    }

    pub fn get_lan_url(&self) -> Result<String, SupervisorError> {
        Ok(self.get_lan_info()?.url)
    }

    pub fn get_qr_code(&self) -> Result<String, SupervisorError> {
        Ok(self.get_lan_info()?.qr_svg)
    }

    pub fn get_lan_info(&self) -> Result<LanInfo, SupervisorError> {
        Ok(lan::lan_info(self.config.port)?)
    }

    // ------------------------------------------------------------------------
    // Environment
    // ------------------------------------------------------------------------

    /// Switch environments. A running server is stopped first.
    pub async fn set_environment(
        &self,
        id: EnvironmentId,
        custom_root: Option<PathBuf>,
    ) -> Result<Environment, SupervisorError> {
        let _guard = self
            .op_lock
            .try_lock()
            .map_err(|_| SupervisorError::Busy("environment change"))?;

        let custom_root = custom_root.map(|p| self.host.service_path(&p));
        let mut next = match self.resolver.lock() {
            Ok(resolver) => resolver.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if !next.set_environment(id, custom_root) {
            return Ok(self.get_environment());
        }

        let state = self.shared.state();
        if self.shared.live_pid().is_some()
            || matches!(state, LifecycleState::Running | LifecycleState::Starting)
        {
            self.shared.log("Stopping Lantern server before switching environment");
            self.stop().await;
        }

        let environment = next.current_environment();
        match self.resolver.lock() {
            Ok(mut resolver) => *resolver = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        self.persist_environment(&environment);

        self.shared
            .log(&format!("Environment: {} ({})", environment.label, environment.install_root.display()));
        self.shared.set_state(if self.is_installed() {
            LifecycleState::Stopped
        } else {
            LifecycleState::NotInstalled
        });

        Ok(environment)
    }

    fn persist_environment(&self, environment: &Environment) {
        let Some(path) = &self.config_path else {
            return;
        };
        let mut config = crate::config::load_config_from(path);
        config.environment = environment.id;
        if let Some(root) = &environment.custom_root {
            config.custom_root = Some(root.clone());
        }
        if let Err(e) = save_config_to(path, &config) {
            warn!("Failed to persist environment selection: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Install / uninstall
    // ------------------------------------------------------------------------

    pub async fn install(&self) -> Result<(), SupervisorError> {
        let _guard = self
            .op_lock
            .try_lock()
            .map_err(|_| SupervisorError::Busy("install"))?;

        let state = self.shared.state();
        if self.shared.live_pid().is_some()
            || matches!(
                state,
                LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
            )
        {
            return Err(SupervisorError::ServiceRunning(state));
        }

        let shared = self.shared.clone();
        let progress = move |message: &str| {
            shared.log(&format!("[install] {}", message));
            shared
                .events
                .publish(SupervisorEvent::InstallProgress(message.to_string()));
        };

        let installer = Installer::new(
            self.host.as_ref(),
            &self.runtime,
            &self.config,
            self.resolve_paths(),
            self.bundle_dir.clone(),
            &progress,
        );

        match installer.install().await {
            Ok(_) => {
                self.shared.set_state(LifecycleState::Stopped);
                Ok(())
            }
            Err(e) => {
                error!("Install failed: {}", e);
                self.shared.set_state(LifecycleState::Error);
                Err(e)
            }
        }
    }

    /// Remove the current install root. Refuses roots outside the launcher namespace.
    pub async fn uninstall(&self) -> Result<(), SupervisorError> {
        let _guard = self
            .op_lock
            .try_lock()
            .map_err(|_| SupervisorError::Busy("uninstall"))?;

        let (paths, known_roots) = match self.resolver.lock() {
            Ok(resolver) => (
                resolver.resolve_paths(),
                vec![resolver.default_root(), resolver.development_root()],
            ),
            Err(_) => return Err(SupervisorError::Io("environment state poisoned".to_string())),
        };

        if !is_recognized_root(&paths.install_root, &known_roots) {
            warn!("Refusing to uninstall {}", paths.install_root.display());
            return Err(SupervisorError::UnsafeUninstallPath(
                paths.install_root.display().to_string(),
            ));
        }

        let state = self.shared.state();
        if self.shared.live_pid().is_some()
            || matches!(state, LifecycleState::Running | LifecycleState::Starting)
        {
            self.stop().await;
        }

        let root_fs = self.host.fs_path(&paths.install_root);
        remove_install_root(&root_fs).await?;

        self.shared
            .log(&format!("Uninstalled Lantern server from {}", paths.install_root.display()));
        self.shared.set_state(LifecycleState::NotInstalled);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Start / stop / restart
    // ------------------------------------------------------------------------

    pub async fn start(&self) -> Result<(), SupervisorError> {
        let _guard = self
            .op_lock
            .try_lock()
            .map_err(|_| SupervisorError::Busy("start"))?;
        self.start_locked().await
    }

    pub async fn restart(&self) -> Result<(), SupervisorError> {
        let _guard = self
            .op_lock
            .try_lock()
            .map_err(|_| SupervisorError::Busy("restart"))?;
        self.stop().await;
        tokio::time::sleep(self.timings.restart_settle).await;
        self.start_locked().await
    }

    fn fail_start(&self, err: SupervisorError) -> SupervisorError {
        error!("Start failed: {}", err);
        self.shared.log(&format!("Start failed: {}", err.user_message()));
        self.shared.set_state(LifecycleState::Error);
        err
    }

    async fn start_locked(&self) -> Result<(), SupervisorError> {
        if let Some(pid) = self.shared.live_pid() {
            info!("Lantern server already running (pid {})", pid);
            self.shared
                .log(&format!("Lantern server is already running (pid {})", pid));
            return Ok(());
        }

        let paths = self.resolve_paths();
        if !self.is_installed() {
            return Err(SupervisorError::NotInstalled);
        }

        self.shared.set_state(LifecycleState::Starting);

        if let Some(state) = read_install_state(&self.host.fs_path(&paths.install_root)) {
            for line in format_install_state_lines(&state) {
                self.shared.log(&line);
            }
        }

        let shared = self.shared.clone();
        let on_pct = move |pct: u8| shared.log(&format!("Downloading Node.js {}%", pct));
        let node = match self.runtime.ensure_runtime(&on_pct).await {
            Ok(node) => node,
            Err(e) => return Err(self.fail_start(e)),
        };
        self.shared
            .log(&format!("Using Node.js runtime at {}", node.display()));

        if self.kill_port().await {
            self.shared.log(&format!(
                "Terminated a stale process holding port {}",
                self.config.port
            ));
        }

        let mut spec = CommandSpec::new(posix(&node))
            .arg(self.config.entry_file.clone())
            .cwd(paths.service_root.clone())
            .env("PORT", self.config.port.to_string())
            .env("NODE_ENV", "production");
        for (k, v) in self.runtime.runtime_env(&node) {
            spec = spec.env(k, v);
        }

        let child = match self.host.spawn(&spec) {
            Ok(child) => child,
            Err(e) => return Err(self.fail_start(SupervisorError::SpawnFailed(e))),
        };
        let (generation, exited) = match self.track(child) {
            Ok(tracked) => tracked,
            Err(e) => return Err(self.fail_start(e)),
        };

        let readiness = wait_until_ready(self.probe.as_ref(), self.timings.readiness, || {
            exited.borrow().clone()
        })
        .await;

        match readiness {
            Readiness::Ready if self.shared.promote_running(generation) => {
                self.shared.log(&format!(
                    "Lantern server ready on http://localhost:{}",
                    self.config.port
                ));
                Ok(())
            }
            Readiness::Ready => Err(SupervisorError::ExitedDuringStartup(
                "stopped before it became ready".to_string(),
            )),
            Readiness::Exited(description) => {
                self.shared
                    .log(&format!("Lantern server exited during startup ({})", description));
                Err(SupervisorError::ExitedDuringStartup(description))
            }
            Readiness::TimedOut => {
                let err = SupervisorError::ReadinessTimeout(self.timings.readiness.timeout.as_secs());
                match self.shared.take_tracked(Some(generation)) {
                    Some(tracked) => {
                        self.terminate(tracked).await;
                        Err(self.fail_start(err))
                    }
                    // stop() got there first and already settled the state
                    None => Err(err),
                }
            }
        }
    }

    /// Register a freshly spawned child and start its monitor tasks
    fn track(&self, mut child: Child) -> Result<(u64, watch::Receiver<Option<String>>), SupervisorError> {
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(SupervisorError::SpawnFailed(
                    "process exited before it could be tracked".to_string(),
                ))
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let generation = {
            let mut inner = self
                .shared
                .inner
                .lock()
                .map_err(|_| SupervisorError::Io("supervisor state poisoned".to_string()))?;
            let generation = inner.next_generation;
            inner.next_generation += 1;
            inner.tracked = Some(Tracked {
                pid,
                generation,
                exited: exit_rx.clone(),
            });
            generation
        };
        info!("Spawned Lantern server (pid {}, generation {})", pid, generation);

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, self.shared.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, self.shared.clone()));
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let description = describe_exit(child.wait().await);
            // Let the readers flush what the child wrote last
            let _ = tokio::time::timeout(
                Duration::from_millis(500),
                futures_util::future::join_all(readers),
            )
            .await;
            exit_tx.send_replace(Some(description.clone()));
            shared.on_child_exit(generation, &description);
        });

        Ok((generation, exit_rx))
    }

    // Host signalling blocks on child commands; run it on the blocking pool

    async fn signal(&self, pid: u32, signal: ProcessSignal) {
        let host = self.host.clone();
        let port = self.config.port;
        if let Err(e) = tokio::task::spawn_blocking(move || host.signal(pid, port, signal)).await {
            warn!("Signal task for pid {} failed: {}", pid, e);
        }
    }

    async fn kill_port(&self) -> bool {
        let host = self.host.clone();
        let port = self.config.port;
        tokio::task::spawn_blocking(move || host.kill_port(port))
            .await
            .unwrap_or_else(|e| {
                warn!("Port cleanup task for {} failed: {}", port, e);
                false
            })
    }

    /// TERM, wait out the grace period, then KILL
    async fn terminate(&self, tracked: Tracked) {
        info!("Stopping Lantern server (pid {})", tracked.pid);
        self.signal(tracked.pid, ProcessSignal::Terminate).await;

        let graceful = tokio::time::timeout(
            self.timings.stop_grace,
            wait_exited(tracked.exited.clone()),
        )
        .await;
        if graceful.is_ok() {
            return;
        }

        warn!(
            "Lantern server (pid {}) ignored SIGTERM for {:?}, killing",
            tracked.pid, self.timings.stop_grace
        );
        self.shared.log("Lantern server did not exit in time, killing it");
        self.signal(tracked.pid, ProcessSignal::Kill).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), wait_exited(tracked.exited)).await;
    }

    /// Stop the server. Never fails; ends in `Stopped`, or `NotInstalled`
    /// when there is no install to stop.
    pub async fn stop(&self) {
        self.shared.set_state(LifecycleState::Stopping);

        match self.shared.take_tracked(None) {
            Some(tracked) => {
                self.terminate(tracked).await;
                self.shared.log("Lantern server stopped");
            }
            None => {
                if self.kill_port().await {
                    self.shared.log(&format!(
                        "Stopped untracked process on port {}",
                        self.config.port
                    ));
                }
            }
        }

        self.shared.set_state(if self.is_installed() {
            LifecycleState::Stopped
        } else {
            LifecycleState::NotInstalled
        });
    }

    /// Stop the tracked child, if any, before the launcher exits
    pub async fn shutdown(&self) {
        if self.shared.live_pid().is_some() {
            info!("Shutting down Lantern server");
            self.stop().await;
        }
    }
}
