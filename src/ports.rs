//! Port and process utilities for Lantern
//!
//! Handles:
//! - Checking whether a process is alive
//! - Finding the processes that hold a port
//! - Signalling and killing process trees
//!
//! These are the native (same-OS) primitives; `host::WslHost` has its own
//! equivalents that run inside the compatibility layer.

use log::{debug, info, warn};
use std::process::Command;
use std::time::Duration;

/// Signal sent to a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask the process to shut down (SIGTERM)
    Terminate,
    /// Force kill (SIGKILL)
    Kill,
}

// ============================================================================
// PROCESS STATE
// ============================================================================

/// Check if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// PIDs of processes listening on a port
pub fn listening_pids(port: u16) -> Vec<u32> {
    #[cfg(unix)]
    {
        let output = match Command::new("lsof")
            .args(["-nP", "-iTCP", &format!(":{}", port), "-sTCP:LISTEN", "-t"])
            .output()
        {
            Ok(o) => o,
            Err(e) => {
                debug!("lsof unavailable: {}", e);
                return Vec::new();
            }
        };

        if !output.status.success() {
            return Vec::new();
        }

        parse_pid_lines(&String::from_utf8_lossy(&output.stdout))
    }
    #[cfg(windows)]
    {
        let output = match Command::new("netstat").args(["-ano", "-p", "TCP"]).output() {
            Ok(o) => o,
            Err(_) => return Vec::new(),
        };
        parse_netstat_listeners(&String::from_utf8_lossy(&output.stdout), port)
    }
}

/// Parse one PID per line (lsof -t / pgrep output), skipping junk and duplicates
pub fn parse_pid_lines(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in output.lines() {
        if let Ok(pid) = line.trim().parse::<u32>() {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// Parse `netstat -ano` output for LISTENING sockets on a port
pub fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();
    for line in output.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 5 || cols[3] != "LISTENING" || !cols[1].ends_with(&suffix) {
            continue;
        }
        if let Ok(pid) = cols[4].parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

// ============================================================================
// SIGNALS
// ============================================================================

/// Send a signal to a process and its process group.
///
/// The service is spawned with `process_group(0)`, so its PID is also its
/// PGID and a signal to `-pid` reaches npm/node grandchildren too.
pub fn signal_process_tree(pid: u32, signal: ProcessSignal) {
    #[cfg(unix)]
    {
        let flag = match signal {
            ProcessSignal::Terminate => "-TERM",
            ProcessSignal::Kill => "-KILL",
        };

        let group_result = Command::new("kill")
            .args([flag, "--", &format!("-{}", pid)])
            .output();

        let group_ok = group_result.map(|o| o.status.success()).unwrap_or(false);
        if !group_ok {
            // Not a group leader, signal the process and its direct children
            if let Ok(output) = Command::new("pgrep").args(["-P", &pid.to_string()]).output() {
                for child in parse_pid_lines(&String::from_utf8_lossy(&output.stdout)) {
                    let _ = Command::new("kill").args([flag, &child.to_string()]).output();
                }
            }
            let _ = Command::new("kill").args([flag, &pid.to_string()]).output();
        }
    }
    #[cfg(windows)]
    {
        let mut args = vec!["/PID".to_string(), pid.to_string(), "/T".to_string()];
        if signal == ProcessSignal::Kill {
            args.push("/F".to_string());
        }
        let _ = Command::new("taskkill").args(&args).output();
    }
}

/// Kill a process tree: SIGTERM, short grace, then SIGKILL if still alive
pub fn kill_process_tree(pid: u32) {
    signal_process_tree(pid, ProcessSignal::Terminate);
    std::thread::sleep(Duration::from_millis(100));
    if is_process_running(pid) {
        signal_process_tree(pid, ProcessSignal::Kill);
    }
}

/// Kill every process listening on a port. Returns whether anything was killed.
pub fn kill_port(port: u16) -> bool {
    let our_pid = std::process::id();
    let pids: Vec<u32> = listening_pids(port)
        .into_iter()
        .filter(|pid| *pid != our_pid)
        .collect();

    if pids.is_empty() {
        return false;
    }

    for pid in &pids {
        info!("Killing process {} listening on port {}", pid, port);
        kill_process_tree(*pid);
    }

    if pids.iter().any(|pid| is_process_running(*pid)) {
        warn!("Some processes on port {} survived the kill", port);
    }

    true
}

// ============================================================================
// TESTS
// ============================================================================
