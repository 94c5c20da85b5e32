// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker process handles.
//!
//! A handle either owns the child it spawned or only knows the command line
//! the worker was started with. In the second case the live PID is found by
//! scanning the process table for that exact command line, with or without
//! a leading `sudo`.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::types::LauncherConfig;

const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error type for process operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Empty command line for worker {0}")]
    EmptyCommand(String),

    #[error("Failed to spawn worker {name}: {message}")]
    SpawnFailed { name: String, message: String },

    #[error("Failed to signal process {pid}: {source}")]
    Signal { pid: u32, source: Errno },
}

/// How a close attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Exited within the grace period.
    Exited,
    /// Still alive after the grace period and killed.
    Killed(u32),
    /// No matching process.
    NotFound,
}

/// Handle to a worker process.
pub struct ProcessHandle {
    name: String,
    cmdline: Vec<String>,
    child: Option<Child>,
}

impl ProcessHandle {
    /// Spawn a worker from its command line.
    pub fn spawn(name: &str, cmdline: Vec<String>) -> Result<Self, ProcessError> {
        let (program, args) = cmdline
            .split_first()
            .ok_or_else(|| ProcessError::EmptyCommand(name.to_string()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        info!(worker = %name, pid = ?child.id(), "Spawned worker process");
        Ok(Self {
            name: name.to_string(),
            cmdline,
            child: Some(child),
        })
    }

    /// A handle for a worker started elsewhere, located by command line.
    pub fn detached(name: &str, cmdline: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            cmdline,
            child: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cmdline(&self) -> &[String] {
        &self.cmdline
    }

    /// Whether this handle owns the child process.
    pub fn is_tracked(&self) -> bool {
        self.child.is_some()
    }

    /// Current PID: the owned child's, or the first process-table match.
    pub async fn pid(&self) -> Option<u32> {
        match &self.child {
            Some(child) => child.id(),
            None => locate(self.cmdline.clone()).await,
        }
    }

    /// Interrupt the worker and wait up to `timeout` for it to exit, then kill it.
    pub async fn close(&mut self, timeout: Duration) -> CloseOutcome {
        if let Some(child) = self.child.as_mut() {
            let pid = match child.id() {
                Some(pid) => pid,
                None => return CloseOutcome::Exited,
            };
            if let Err(e) = send_signal(pid, Signal::SIGINT) {
                debug!(worker = %self.name, "Interrupt failed: {}", e);
            }
            let waited = tokio::time::timeout(timeout, child.wait()).await;
            return match waited {
                Ok(Ok(status)) => {
                    debug!(worker = %self.name, %status, "Worker exited");
                    CloseOutcome::Exited
                }
                Ok(Err(e)) => {
                    warn!(worker = %self.name, "Failed to wait for worker: {}", e);
                    CloseOutcome::Exited
                }
                Err(_) => {
                    warn!(worker = %self.name, "Worker ignored interrupt, killing");
                    match self.kill().await {
                        Some(pid) => CloseOutcome::Killed(pid),
                        None => CloseOutcome::Exited,
                    }
                }
            };
        }

        let pid = match self.discover().await {
            Some(pid) => pid,
            None => return CloseOutcome::NotFound,
        };
        if let Err(e) = send_signal(pid, Signal::SIGINT) {
            debug!(worker = %self.name, "Interrupt failed: {}", e);
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !is_alive(pid) {
                return CloseOutcome::Exited;
            }
            tokio::time::sleep(LIVENESS_POLL_INTERVAL).await;
        }

        warn!(worker = %self.name, pid, "Worker ignored interrupt, terminating");
        match send_signal(pid, Signal::SIGTERM) {
            Ok(()) => CloseOutcome::Killed(pid),
            Err(_) => CloseOutcome::Exited,
        }
    }

    /// Kill the worker immediately: SIGKILL for an owned child, SIGTERM for
    /// a discovered process. Returns the PID that was signalled.
    pub async fn kill(&mut self) -> Option<u32> {
        if let Some(child) = self.child.as_mut() {
            let pid = child.id()?;
            return match child.kill().await {
                Ok(()) => Some(pid),
                Err(e) => {
                    warn!(worker = %self.name, pid, "Kill failed: {}", e);
                    None
                }
            };
        }

        let pid = self.discover().await?;
        match send_signal(pid, Signal::SIGTERM) {
            Ok(()) => Some(pid),
            Err(e) => {
                warn!(worker = %self.name, "{}", e);
                None
            }
        }
    }

    /// Look the worker up by command line, never matching ourselves.
    async fn discover(&self) -> Option<u32> {
        let pid = locate(self.cmdline.clone()).await?;
        if pid == std::process::id() {
            warn!(worker = %self.name, "Command line resolves to the manager itself");
            return None;
        }
        Some(pid)
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("cmdline", &self.cmdline)
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

// ============================================================================
// Launching
// ============================================================================

/// Builds worker command lines and starts workers.
pub trait Launcher: Send + Sync {
    /// The exact command line a worker named `name` runs with.
    fn command_line(&self, name: &str, port: u16) -> Vec<String>;

    /// Start the worker.
    fn launch(&self, name: &str, port: u16) -> Result<ProcessHandle, ProcessError> {
        ProcessHandle::spawn(name, self.command_line(name, port))
    }
}

/// Launches workers from a configured command template.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    config: LauncherConfig,
}

impl CommandLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }
}

impl Launcher for CommandLauncher {
    fn command_line(&self, name: &str, port: u16) -> Vec<String> {
        self.config.command_line(name, port)
    }
}

// ============================================================================
// Process table
// ============================================================================

/// Whether `candidate` is `cmdline`, optionally prefixed by `sudo`.
pub fn matches_cmdline(candidate: &[String], cmdline: &[String]) -> bool {
    if cmdline.is_empty() {
        return false;
    }
    match candidate.split_first() {
        Some((first, rest)) if first == "sudo" => rest == cmdline || candidate == cmdline,
        _ => candidate == cmdline,
    }
}

/// Find the first process whose command line matches.
pub fn find_process(cmdline: &[String]) -> Option<u32> {
    if cmdline.is_empty() {
        return None;
    }
    let system = System::new_all();
    let mut matches: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| {
            let candidate: Vec<String> = process
                .cmd()
                .iter()
                .map(|arg| AsRef::<OsStr>::as_ref(arg).to_string_lossy().into_owned())
                .collect();
            matches_cmdline(&candidate, cmdline)
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();
    matches.sort_unstable();
    matches.into_iter().next()
}

/// [`find_process`] off the async runtime.
pub async fn locate(cmdline: Vec<String>) -> Option<u32> {
    match tokio::task::spawn_blocking(move || find_process(&cmdline)).await {
        Ok(pid) => pid,
        Err(e) => {
            warn!("Process lookup failed: {}", e);
            None
        }
    }
}

/// Send a signal to a process.
pub fn send_signal(pid: u32, sig: Signal) -> Result<(), ProcessError> {
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(|source| ProcessError::Signal { pid, source })
}

/// Whether a process with this PID exists.
pub fn is_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_plain_and_sudo() {
        let cmdline = args(&["python3", "launcher.py", "bulbe"]);
        assert!(matches_cmdline(&cmdline, &cmdline));
        assert!(matches_cmdline(&args(&["sudo", "python3", "launcher.py", "bulbe"]), &cmdline));
        assert!(!matches_cmdline(&args(&["python3", "launcher.py", "juan"]), &cmdline));
        assert!(!matches_cmdline(&args(&["python3", "launcher.py"]), &cmdline));
        assert!(!matches_cmdline(&args(&["doas", "python3", "launcher.py", "bulbe"]), &cmdline));
        assert!(!matches_cmdline(&cmdline, &[]));
    }

    #[test]
    fn test_command_launcher_line() {
        let launcher = CommandLauncher::new(LauncherConfig::new(
            "python3",
            args(&["launcher.py", "{name}"]),
        ));
        assert_eq!(launcher.command_line("bulbe", 8800), args(&["python3", "launcher.py", "bulbe"]));
    }

    #[tokio::test]
    async fn test_spawn_empty_command() {
        let result = ProcessHandle::spawn("bulbe", Vec::new());
        assert!(matches!(result, Err(ProcessError::EmptyCommand(_))));
    }

    #[tokio::test]
    async fn test_spawn_invalid_command() {
        let result = ProcessHandle::spawn("bulbe", args(&["nonexistent_command_12345"]));
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_close_interrupts_child() {
        let mut handle = ProcessHandle::spawn("sleeper", args(&["sleep", "30"])).unwrap();
        assert!(handle.is_tracked());
        assert!(handle.pid().await.is_some());

        let outcome = handle.close(Duration::from_secs(5)).await;
        assert_eq!(outcome, CloseOutcome::Exited);
    }

    #[tokio::test]
    async fn test_close_escalates_to_kill() {
        let mut handle = ProcessHandle::spawn(
            "stubborn",
            args(&["sh", "-c", "trap '' INT; sleep 30"]),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = handle.close(Duration::from_millis(300)).await;
        assert!(matches!(outcome, CloseOutcome::Killed(_)));
    }

    #[tokio::test]
    async fn test_kill_child_returns_pid() {
        let mut handle = ProcessHandle::spawn("sleeper", args(&["sleep", "30"])).unwrap();
        let pid = handle.pid().await;
        assert_eq!(handle.kill().await, pid);
    }

    #[tokio::test]
    async fn test_detached_kill_by_cmdline() {
        let cmdline = args(&["sleep", "47.25"]);
        let mut child = std::process::Command::new("sleep").arg("47.25").spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut handle = ProcessHandle::detached("napper", cmdline);
        assert!(!handle.is_tracked());
        assert_eq!(handle.pid().await, Some(child.id()));
        assert_eq!(handle.kill().await, Some(child.id()));
        let _ = child.wait();
    }

    #[tokio::test]
    async fn test_detached_missing_process() {
        let mut handle = ProcessHandle::detached("ghost", args(&["no-such-worker", "ghost-8931"]));
        assert_eq!(handle.pid().await, None);
        assert_eq!(handle.close(Duration::from_millis(50)).await, CloseOutcome::NotFound);
        assert_eq!(handle.kill().await, None);
    }

    #[tokio::test]
    async fn test_locate_matches_find_process() {
        let mut child = std::process::Command::new("sleep").arg("46.5").spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let cmdline = args(&["sleep", "46.5"]);
        assert_eq!(locate(cmdline.clone()).await, Some(child.id()));
        assert_eq!(locate(Vec::new()).await, None);
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_is_alive() {
        assert!(is_alive(std::process::id()));
    }
}
