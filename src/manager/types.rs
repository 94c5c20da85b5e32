// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the fleet manager.
//!
//! Resolved configuration, alert thresholds and the externally visible
//! worker status.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name the manager uses on the wire (`to`/`from` fields).
pub const MANAGER_NAME: &str = "manager";

/// Default TCP port the manager listens on.
pub const DEFAULT_PORT: u16 = 8800;

/// Default host the manager binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Placeholder in launcher arguments replaced by the worker name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Placeholder in launcher arguments replaced by the manager port.
pub const PORT_PLACEHOLDER: &str = "{port}";

// ============================================================================
// Manager Configuration
// ============================================================================

/// Fully resolved manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Host to bind the listener to.
    pub host: String,
    /// Port to bind the listener to (0 picks a free port).
    pub port: u16,
    /// Workers started when the manager starts.
    pub startup: Vec<String>,
    /// Alert webhook URL. Alerts go to the log when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// How worker processes are launched.
    pub launcher: LauncherConfig,
    /// Spawn worker processes, or only register them and rely on lookup.
    pub spawn_workers: bool,
    /// Default wait for a correlated response, in seconds.
    pub response_timeout_secs: f64,
    /// Grace period for a worker to exit after an interrupt, in seconds.
    pub close_timeout_secs: f64,
    /// Health loop settings.
    pub metrics: MetricsConfig,
    /// Alert thresholds.
    pub thresholds: Thresholds,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            startup: vec!["bulbe".to_string()],
            webhook_url: None,
            launcher: LauncherConfig::default(),
            spawn_workers: true,
            response_timeout_secs: 10.0,
            close_timeout_secs: 10.0,
            metrics: MetricsConfig::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl ManagerConfig {
    /// Config for an in-process manager on an ephemeral port with no
    /// startup workers and the health loop disabled.
    pub fn ephemeral() -> Self {
        Self {
            port: 0,
            startup: Vec::new(),
            metrics: MetricsConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout_secs)
    }

    /// Set the startup workers.
    pub fn with_startup(mut self, names: Vec<String>) -> Self {
        self.startup = names;
        self
    }

    /// Set the listener port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Command line template for launching a worker.
///
/// `{name}` and `{port}` in `args` are substituted at launch. The resulting
/// command line is also what process lookup matches against, so it must be
/// reconstructible from the worker name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let program = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "marvin".to_string());
        Self {
            program,
            args: vec![
                "worker".to_string(),
                NAME_PLACEHOLDER.to_string(),
                "--port".to_string(),
                PORT_PLACEHOLDER.to_string(),
            ],
        }
    }
}

impl LauncherConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Full command line for a worker, program first.
    pub fn command_line(&self, name: &str, port: u16) -> Vec<String> {
        let port = port.to_string();
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| {
                arg.replace(NAME_PLACEHOLDER, name)
                    .replace(PORT_PLACEHOLDER, &port)
            }))
            .collect()
    }
}

/// Health loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsConfig {
    pub enabled: bool,
    pub startup_delay_secs: f64,
    pub interval_secs: f64,
    pub ping_timeout_secs: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_secs: 10.0,
            interval_secs: 30.0,
            ping_timeout_secs: 10.0,
        }
    }
}

impl MetricsConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs_f64(self.startup_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout_secs)
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Alert thresholds per subject class. `None` disables a check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub system: SystemThresholds,
    pub worker: WorkerThresholds,
}

/// Whole-machine thresholds (percent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemThresholds {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
}

impl Default for SystemThresholds {
    fn default() -> Self {
        Self {
            cpu: Some(90.0),
            memory: Some(90.0),
        }
    }
}

/// Per-process thresholds, applied to the manager and every worker.
/// CPU and memory in percent, pings in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerThresholds {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub socket_ping: Option<f64>,
    pub platform_ping: Option<f64>,
}

impl Default for WorkerThresholds {
    fn default() -> Self {
        Self {
            cpu: Some(10.0),
            memory: Some(30.0),
            socket_ping: Some(0.1),
            platform_ping: Some(0.1),
        }
    }
}

// ============================================================================
// Worker Status
// ============================================================================

/// Lifecycle status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered, waiting for the worker to dial in.
    Unbound,
    /// Connection bound and not closed.
    Active,
    /// Closed gracefully or killed.
    Closed,
}

impl WorkerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "unbound"),
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Round-trip ping figures for a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingResult {
    /// Socket round trip measured by the manager.
    pub round_trip: Duration,
    /// Chat-platform latency reported by the worker, in seconds.
    pub platform: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_config_default() {
        let config = ManagerConfig::default();
        assert_eq!(config.port, 8800);
        assert_eq!(config.startup, vec!["bulbe".to_string()]);
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert_eq!(config.close_timeout(), Duration::from_secs(10));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.interval(), Duration::from_secs(30));
        assert_eq!(config.metrics.startup_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_ephemeral_config() {
        let config = ManagerConfig::ephemeral();
        assert_eq!(config.port, 0);
        assert!(config.startup.is_empty());
        assert!(!config.metrics.enabled);
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn test_launcher_command_line_substitution() {
        let launcher = LauncherConfig::new(
            "python3",
            vec!["launcher.py".into(), "{name}".into(), "--port={port}".into()],
        );
        assert_eq!(
            launcher.command_line("bulbe", 8800),
            vec!["python3", "launcher.py", "bulbe", "--port=8800"]
        );
    }

    #[test]
    fn test_default_launcher_targets_worker_subcommand() {
        let cmdline = LauncherConfig::default().command_line("juan", 9000);
        assert_eq!(&cmdline[1..], &["worker", "juan", "--port", "9000"]);
    }

    #[test]
    fn test_threshold_defaults() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.system.cpu, Some(90.0));
        assert_eq!(thresholds.system.memory, Some(90.0));
        assert_eq!(thresholds.worker.cpu, Some(10.0));
        assert_eq!(thresholds.worker.memory, Some(30.0));
        assert_eq!(thresholds.worker.socket_ping, Some(0.1));
    }

    #[test]
    fn test_partial_thresholds_deserialize() {
        let thresholds: Thresholds =
            serde_json::from_str(r#"{"system": {"cpu": 70}}"#).unwrap();
        assert_eq!(thresholds.system.cpu, Some(70.0));
        assert_eq!(thresholds.system.memory, Some(90.0));
        assert_eq!(thresholds.worker, WorkerThresholds::default());
    }

    #[test]
    fn test_worker_status_display() {
        assert_eq!(WorkerStatus::Unbound.to_string(), "unbound");
        assert!(WorkerStatus::Active.is_active());
        assert!(!WorkerStatus::Closed.is_active());
    }
}
