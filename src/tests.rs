//! Supervisor scenario tests
//!
//! Covers:
//! - Install (source strategy) through a scripted host
//! - Start/stop transitions and the events they publish
//! - Readiness timeout and child exit handling
//! - Uninstall safety guard
//! - Overlapping operations

use super::*;
use crate::health::{HealthProbe, PollTimings};
use crate::host::{CommandSpec, HostAdapter, StepOutput};
use crate::ports::ProcessSignal;
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

// ==================== FAKES ====================

/// Host that scripts install steps and spawns a shell in place of the server
struct FakeHost {
    home: PathBuf,
    has_git: bool,
    /// Substring of a step's display that should fail
    fail_step: Option<&'static str>,
    /// Shell script run in place of the server
    server_script: &'static str,
    commands: Mutex<Vec<String>>,
    /// `origin` remote of the checkout in the install root
    origin: Mutex<Option<String>>,
    signals: Mutex<Vec<(u32, ProcessSignal)>>,
    kill_port_calls: AtomicUsize,
}

impl FakeHost {
    fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            has_git: true,
            fail_step: None,
            server_script: "echo listening; exec sleep 30",
            commands: Mutex::new(Vec::new()),
            origin: Mutex::new(None),
            signals: Mutex::new(Vec::new()),
            kill_port_calls: AtomicUsize::new(0),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn signals(&self) -> Vec<(u32, ProcessSignal)> {
        self.signals.lock().unwrap().clone()
    }
}

impl HostAdapter for FakeHost {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn home_dir(&self) -> Result<PathBuf, String> {
        Ok(self.home.clone())
    }

    fn base_path(&self) -> String {
        "/usr/bin:/bin".to_string()
    }

    fn fs_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    fn runtime_platform(&self) -> (&'static str, &'static str) {
        ("linux", "x64")
    }

    fn conventional_runtime_dirs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn find_program<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<PathBuf>> {
        Box::pin(async move {
            match name {
                "git" if self.has_git => Some(PathBuf::from("/usr/bin/git")),
                _ => None,
            }
        })
    }

    fn run<'a>(&'a self, spec: &'a CommandSpec) -> BoxFuture<'a, Result<StepOutput, String>> {
        Box::pin(async move {
            let display = spec.display();
            self.commands.lock().unwrap().push(display.clone());

            if let Some(step) = self.fail_step {
                if display.contains(step) {
                    return Ok(StepOutput {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: format!("{} failed", step),
                    });
                }
            }

            if spec.args == ["remote", "get-url", "origin"] {
                return Ok(match self.origin.lock().unwrap().clone() {
                    Some(url) => StepOutput {
                        exit_code: Some(0),
                        stdout: format!("{}\n", url),
                        stderr: String::new(),
                    },
                    None => StepOutput {
                        exit_code: Some(2),
                        stdout: String::new(),
                        stderr: "error: No such remote 'origin'".to_string(),
                    },
                });
            }
            if spec.args.first().map(String::as_str) == Some("clone") {
                let n = spec.args.len();
                std::fs::create_dir_all(Path::new(&spec.args[n - 1]).join(".git")).unwrap();
                *self.origin.lock().unwrap() = Some(spec.args[n - 2].clone());
            }
            if spec.args == ["run", "build"] {
                if let Some(cwd) = &spec.cwd {
                    std::fs::create_dir_all(cwd.join("dist")).unwrap();
                    std::fs::write(cwd.join("dist/index.js"), "// built").unwrap();
                }
            }

            Ok(StepOutput {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<tokio::process::Child, String> {
        self.commands.lock().unwrap().push(spec.display());
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", self.server_script])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn().map_err(|e| e.to_string())
    }

    fn signal(&self, pid: u32, _port: u16, signal: ProcessSignal) {
        self.signals.lock().unwrap().push((pid, signal));
        crate::ports::signal_process_tree(pid, signal);
    }

    fn kill_port(&self, _port: u16) -> bool {
        self.kill_port_calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Probe that fails `fail_first` times, then succeeds while `up` is set
struct ScriptedProbe {
    calls: AtomicUsize,
    fail_first: usize,
    up: AtomicBool,
}

impl ScriptedProbe {
    fn new(fail_first: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
            up: AtomicBool::new(true),
        }
    }

    fn never() -> Self {
        let probe = Self::new(0);
        probe.up.store(false, Ordering::SeqCst);
        probe
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for ScriptedProbe {
    fn probe(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            n >= self.fail_first && self.up.load(Ordering::SeqCst)
        })
    }
}

fn fast_timings() -> SupervisorTimings {
    SupervisorTimings {
        readiness: PollTimings {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(800),
        },
        stop_grace: Duration::from_millis(500),
        restart_settle: Duration::from_millis(10),
    }
}

struct Fixture {
    _temp: TempDir,
    lantern_root: PathBuf,
    host: Arc<FakeHost>,
    probe: Arc<ScriptedProbe>,
    supervisor: Supervisor,
}

fn fixture_with(host: FakeHost, probe: ScriptedProbe, temp: TempDir) -> Fixture {
    let lantern_root = temp.path().join(".lantern");

    // Private runtime already provisioned
    let node = lantern_root.join("runtime/node/v22.12.0-x64/bin/node");
    std::fs::create_dir_all(node.parent().unwrap()).unwrap();
    std::fs::write(&node, "").unwrap();

    let host = Arc::new(host);
    let probe = Arc::new(probe);
    let supervisor = Supervisor::new(SupervisorOptions {
        config: LauncherConfig::default(),
        config_path: None,
        lantern_root: lantern_root.clone(),
        host: host.clone(),
        probe: probe.clone(),
        bundle_dir: None,
        timings: fast_timings(),
    });

    Fixture {
        _temp: temp,
        lantern_root,
        host,
        probe,
        supervisor,
    }
}

fn fixture(probe: ScriptedProbe) -> Fixture {
    let temp = TempDir::new().unwrap();
    let host = FakeHost::new(temp.path());
    fixture_with(host, probe, temp)
}

fn status_changes(events: &mut Subscription<SupervisorEvent>) -> Vec<LifecycleState> {
    events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SupervisorEvent::StatusChanged(state) => Some(state),
            _ => None,
        })
        .collect()
}

// ==================== INSTALL ====================

#[tokio::test]
async fn test_status_before_install_does_not_probe() {
    let f = fixture(ScriptedProbe::new(0));
    assert_eq!(f.supervisor.state(), LifecycleState::NotInstalled);
    assert_eq!(f.supervisor.get_status().await, LifecycleState::NotInstalled);
    assert!(!f.supervisor.is_installed());
    assert_eq!(f.probe.calls(), 0);
}

#[tokio::test]
async fn test_source_install_runs_steps_in_order() {
    let f = fixture(ScriptedProbe::never());
    let mut events = f.supervisor.subscribe();

    f.supervisor.install().await.unwrap();

    let commands = f.host.commands();
    assert_eq!(commands.len(), 4);
    assert!(commands[0].contains("clone --depth 1 --branch"));
    assert!(commands[1].ends_with("install --ignore-scripts"));
    assert!(commands[2].ends_with("npm install"));
    assert!(commands[3].ends_with("run build"));

    assert!(f.supervisor.is_installed());
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
    assert_eq!(f.supervisor.get_status().await, LifecycleState::Stopped);

    let drained = events.drain();
    assert!(drained
        .iter()
        .any(|e| matches!(e, SupervisorEvent::InstallProgress(m) if m == "Install complete")));
    assert!(f
        .supervisor
        .get_logs(500)
        .iter()
        .any(|l| l.contains("[install] Building server")));

    let state = crate::install_state::read_install_state(&f.lantern_root.join("service")).unwrap();
    assert_eq!(state.stage, crate::install_state::InstallStage::Complete);
}

#[tokio::test]
async fn test_install_without_git_reports_remediation() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.has_git = false;
    let f = fixture_with(host, ScriptedProbe::never(), temp);

    let err = f.supervisor.install().await.unwrap_err();
    assert!(matches!(err, SupervisorError::GitMissing));
    assert!(err.remediation().is_some());
    assert_eq!(f.supervisor.state(), LifecycleState::Error);
    assert!(f.host.commands().is_empty());
}

#[tokio::test]
async fn test_failed_build_step_surfaces_stderr() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.fail_step = Some("run build");
    let f = fixture_with(host, ScriptedProbe::never(), temp);

    match f.supervisor.install().await {
        Err(SupervisorError::StepFailed {
            step,
            exit_code,
            stderr,
        }) => {
            assert_eq!(step, "build");
            assert_eq!(exit_code, Some(1));
            assert!(stderr.contains("run build failed"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!f.supervisor.is_installed());
    assert_eq!(f.supervisor.state(), LifecycleState::Error);
}

#[tokio::test]
async fn test_reinstall_pulls_existing_checkout() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();
    f.supervisor.install().await.unwrap();

    let commands = f.host.commands();
    assert!(commands[4].ends_with("remote get-url origin"));
    assert!(commands[5].ends_with("pull --ff-only"));
    assert_eq!(
        commands.iter().filter(|c| c.contains(" clone ")).count(),
        1
    );
}

// ==================== START / STOP ====================

#[cfg(unix)]
#[tokio::test]
async fn test_start_then_stop_lifecycle() {
    let f = fixture(ScriptedProbe::new(1));
    f.supervisor.install().await.unwrap();

    let mut events = f.supervisor.subscribe();
    f.supervisor.start().await.unwrap();

    assert_eq!(
        status_changes(&mut events),
        vec![LifecycleState::Starting, LifecycleState::Running]
    );
    assert_eq!(f.supervisor.state(), LifecycleState::Running);
    assert!(f.supervisor.tracked_pid().is_some());
    assert!(f
        .host
        .commands()
        .last()
        .unwrap()
        .contains("dist/index.js"));

    let pid = f.supervisor.tracked_pid().unwrap();
    f.supervisor.stop().await;

    assert_eq!(
        status_changes(&mut events),
        vec![LifecycleState::Stopping, LifecycleState::Stopped]
    );
    assert_eq!(f.host.signals(), vec![(pid, ProcessSignal::Terminate)]);
    assert!(f.supervisor.tracked_pid().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_second_start_while_running_is_noop() {
    let f = fixture(ScriptedProbe::new(0));
    f.supervisor.install().await.unwrap();
    f.supervisor.start().await.unwrap();
    let pid = f.supervisor.tracked_pid();

    f.supervisor.start().await.unwrap();
    assert_eq!(f.supervisor.tracked_pid(), pid);
    assert!(f
        .supervisor
        .get_logs(10)
        .iter()
        .any(|l| l.contains("already running")));

    f.supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_concurrent_start_is_rejected() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();

    let second = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.supervisor.start().await
    };
    let (first, second) = tokio::join!(f.supervisor.start(), second);

    assert!(matches!(second, Err(SupervisorError::Busy("start"))));
    assert!(matches!(first, Err(SupervisorError::ReadinessTimeout(_))));
    let spawns = f
        .host
        .commands()
        .iter()
        .filter(|c| c.contains("dist/index.js"))
        .count();
    assert_eq!(spawns, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_readiness_timeout_kills_child() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();
    let mut events = f.supervisor.subscribe();

    let err = f.supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::ReadinessTimeout(_)));
    assert_eq!(f.supervisor.state(), LifecycleState::Error);
    assert!(f.supervisor.tracked_pid().is_none());
    assert_eq!(f.host.signals().first().map(|s| s.1), Some(ProcessSignal::Terminate));
    assert_eq!(
        status_changes(&mut events),
        vec![LifecycleState::Starting, LifecycleState::Error]
    );

    // stop recovers from Error
    f.supervisor.stop().await;
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_exit_during_startup() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.server_script = "echo boom >&2; exit 3";
    let f = fixture_with(host, ScriptedProbe::never(), temp);
    f.supervisor.install().await.unwrap();

    match f.supervisor.start().await {
        Err(SupervisorError::ExitedDuringStartup(description)) => {
            assert_eq!(description, "exit code 3")
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
    assert!(f.supervisor.get_logs(20).iter().any(|l| l.ends_with("boom")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_exit_after_running_forces_stopped() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.server_script = "sleep 0.3";
    let f = fixture_with(host, ScriptedProbe::new(0), temp);
    f.supervisor.install().await.unwrap();

    let mut events = f.supervisor.subscribe();
    f.supervisor.start().await.unwrap();
    assert_eq!(f.supervisor.state(), LifecycleState::Running);

    tokio::time::timeout(Duration::from_secs(5), async {
        while f.supervisor.state() != LifecycleState::Stopped {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        status_changes(&mut events),
        vec![
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecycleState::Stopped
        ]
    );
    assert!(f.supervisor.tracked_pid().is_none());
}

#[tokio::test]
async fn test_foreign_checkout_is_backed_up_not_pulled() {
    let f = fixture(ScriptedProbe::never());
    let root = f.lantern_root.join("service");
    std::fs::create_dir_all(root.join(".git")).unwrap();
    std::fs::write(root.join("README.md"), "someone else's project").unwrap();
    *f.host.origin.lock().unwrap() = Some("https://example.com/someone/else.git".to_string());

    f.supervisor.install().await.unwrap();

    let commands = f.host.commands();
    assert!(commands[0].ends_with("remote get-url origin"));
    assert!(commands[1].contains(" clone "));
    assert!(!commands.iter().any(|c| c.contains("pull")));

    let backups: Vec<PathBuf> = std::fs::read_dir(&f.lantern_root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains("service.backup-"))
        .collect();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].join("README.md").is_file());
    assert!(!root.join("README.md").exists());
    assert!(f.supervisor.is_installed());
}

#[tokio::test]
async fn test_stop_with_nothing_tracked_falls_back_to_port() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();
    f.supervisor.stop().await;
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
    assert_eq!(f.host.kill_port_calls.load(Ordering::SeqCst), 1);
    assert!(f.host.signals().is_empty());
}

#[tokio::test]
async fn test_start_before_install_fails() {
    let f = fixture(ScriptedProbe::new(0));
    assert!(matches!(
        f.supervisor.start().await,
        Err(SupervisorError::NotInstalled)
    ));
    assert_eq!(f.supervisor.state(), LifecycleState::NotInstalled);
}

#[tokio::test]
async fn test_stop_without_install_stays_not_installed() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.stop().await;
    assert!(!f.supervisor.is_installed());
    assert_eq!(f.supervisor.state(), LifecycleState::NotInstalled);
    assert_eq!(f.supervisor.get_status().await, LifecycleState::NotInstalled);
}

#[cfg(unix)]
#[tokio::test]
async fn test_restart_replaces_child() {
    let f = fixture(ScriptedProbe::new(0));
    f.supervisor.install().await.unwrap();
    f.supervisor.start().await.unwrap();
    let first = f.supervisor.tracked_pid().unwrap();

    let mut events = f.supervisor.subscribe();
    f.supervisor.restart().await.unwrap();

    assert_eq!(
        status_changes(&mut events),
        vec![
            LifecycleState::Stopping,
            LifecycleState::Stopped,
            LifecycleState::Starting,
            LifecycleState::Running
        ]
    );
    let second = f.supervisor.tracked_pid().unwrap();
    assert_ne!(first, second);
    assert!(!crate::ports::is_process_running(first));

    f.supervisor.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.server_script = "trap '' TERM; exec sleep 30";
    let f = fixture_with(host, ScriptedProbe::new(0), temp);
    f.supervisor.install().await.unwrap();
    f.supervisor.start().await.unwrap();
    let pid = f.supervisor.tracked_pid().unwrap();

    f.supervisor.stop().await;

    assert_eq!(
        f.host.signals(),
        vec![(pid, ProcessSignal::Terminate), (pid, ProcessSignal::Kill)]
    );
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
    assert!(!crate::ports::is_process_running(pid));
    assert!(f
        .supervisor
        .get_logs(20)
        .iter()
        .any(|l| l.contains("did not exit in time")));
}

#[cfg(unix)]
#[tokio::test]
async fn test_status_is_starting_while_not_ready() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();

    let status = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        f.supervisor.get_status().await
    };
    let (started, status) = tokio::join!(f.supervisor.start(), status);

    assert_eq!(status, LifecycleState::Starting);
    assert!(matches!(started, Err(SupervisorError::ReadinessTimeout(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_log_events_follow_buffer_order() {
    let temp = TempDir::new().unwrap();
    let mut host = FakeHost::new(temp.path());
    host.server_script =
        "i=0; while [ $i -lt 100 ]; do echo out $i; echo err $i >&2; i=$((i+1)); done; exec sleep 30";
    let f = fixture_with(host, ScriptedProbe::new(0), temp);
    f.supervisor.install().await.unwrap();

    let mut events = f.supervisor.subscribe();
    f.supervisor.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let logs = f.supervisor.get_logs(500);
            let done = logs.iter().any(|l| l.ends_with("out 99"))
                && logs.iter().any(|l| l.ends_with("err 99"));
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let published: Vec<String> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SupervisorEvent::LogLine(line) => Some(line),
            _ => None,
        })
        .collect();
    assert!(published.len() >= 200);
    assert_eq!(published, f.supervisor.get_logs(published.len()));

    f.supervisor.shutdown().await;
}

// ==================== UNINSTALL ====================

#[tokio::test]
async fn test_uninstall_default_root() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();
    let root = f.lantern_root.join("service");
    assert!(root.is_dir());

    let mut events = f.supervisor.subscribe();
    f.supervisor.uninstall().await.unwrap();

    assert!(!root.exists());
    assert_eq!(status_changes(&mut events), vec![LifecycleState::NotInstalled]);
    assert!(!f.supervisor.is_installed());

    // Already gone is still success
    f.supervisor.uninstall().await.unwrap();
}

#[tokio::test]
async fn test_uninstall_refuses_unrelated_custom_root() {
    let f = fixture(ScriptedProbe::never());
    let unrelated = f.lantern_root.parent().unwrap().join("unrelated");
    std::fs::create_dir_all(unrelated.join("server/dist")).unwrap();
    std::fs::write(unrelated.join("server/dist/index.js"), "").unwrap();

    let env = f
        .supervisor
        .set_environment(EnvironmentId::Custom, Some(unrelated.clone()))
        .await
        .unwrap();
    assert_eq!(env.install_root, unrelated);
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);

    let err = f.supervisor.uninstall().await.unwrap_err();
    assert!(matches!(err, SupervisorError::UnsafeUninstallPath(_)));
    assert!(unrelated.join("server/dist/index.js").exists());
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
}

// ==================== ENVIRONMENT ====================

#[tokio::test]
async fn test_switch_environment_changes_roots_only() {
    let f = fixture(ScriptedProbe::never());
    f.supervisor.install().await.unwrap();

    let env = f
        .supervisor
        .set_environment(EnvironmentId::Development, None)
        .await
        .unwrap();
    assert_eq!(env.install_root, f.lantern_root.join("dev-service"));
    assert_eq!(f.supervisor.state(), LifecycleState::NotInstalled);
    assert!(f.lantern_root.join("service/server/dist/index.js").exists());

    f.supervisor
        .set_environment(EnvironmentId::Default, None)
        .await
        .unwrap();
    assert_eq!(f.supervisor.state(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_switch_environment_while_running_stops_child() {
    let f = fixture(ScriptedProbe::new(0));
    f.supervisor.install().await.unwrap();
    f.supervisor.start().await.unwrap();
    let pid = f.supervisor.tracked_pid().unwrap();

    let mut events = f.supervisor.subscribe();
    f.supervisor
        .set_environment(EnvironmentId::Development, None)
        .await
        .unwrap();

    assert_eq!(
        status_changes(&mut events),
        vec![
            LifecycleState::Stopping,
            LifecycleState::Stopped,
            LifecycleState::NotInstalled
        ]
    );
    assert!(f.supervisor.tracked_pid().is_none());
    assert!(!crate::ports::is_process_running(pid));
    assert_eq!(f.host.signals(), vec![(pid, ProcessSignal::Terminate)]);
}

#[tokio::test]
async fn test_environment_selection_is_persisted() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("launcher.json");
    let lantern_root = temp.path().join(".lantern");
    let host = Arc::new(FakeHost::new(temp.path()));
    let supervisor = Supervisor::new(SupervisorOptions {
        config: LauncherConfig::default(),
        config_path: Some(config_path.clone()),
        lantern_root,
        host,
        probe: Arc::new(ScriptedProbe::never()),
        bundle_dir: None,
        timings: fast_timings(),
    });

    supervisor
        .set_environment(EnvironmentId::Development, None)
        .await
        .unwrap();

    let saved = crate::config::load_config_from(&config_path);
    assert_eq!(saved.environment, EnvironmentId::Development);
}
