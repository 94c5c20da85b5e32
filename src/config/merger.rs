// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use crate::error::ConfigError;
use crate::manager::types::{ManagerConfig, MANAGER_NAME};

use super::types::ManagerFileConfig;

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub startup: Option<Vec<String>>,
    pub webhook_url: Option<String>,
    pub no_metrics: Option<bool>,
    pub spawn_workers: Option<bool>,
}

/// Default configuration values.
pub fn default_config() -> ManagerConfig {
    ManagerConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (marvin.yaml)
/// 3. Global config (~/.marvin/config.yaml)
/// 4. Default values
pub fn merge_config(
    global: Option<ManagerFileConfig>,
    workspace: Option<ManagerFileConfig>,
    cli: CliOptions,
) -> ManagerConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_file_config(&mut result, config);
    }

    if let Some(config) = workspace {
        apply_file_config(&mut result, config);
    }

    apply_cli_options(&mut result, cli);

    result
}

fn apply_file_config(result: &mut ManagerConfig, config: ManagerFileConfig) {
    if let Some(host) = config.host {
        result.host = host;
    }
    if let Some(port) = config.port {
        result.port = port;
    }
    if let Some(startup) = config.startup {
        result.startup = startup;
    }
    if config.webhook_url.is_some() {
        result.webhook_url = config.webhook_url;
    }
    if let Some(launcher) = config.launcher {
        if let Some(program) = launcher.program {
            result.launcher.program = program;
        }
        if let Some(args) = launcher.args {
            result.launcher.args = args;
        }
    }
    if let Some(spawn) = config.spawn_workers {
        result.spawn_workers = spawn;
    }
    if let Some(timeout) = config.response_timeout {
        result.response_timeout_secs = timeout;
    }
    if let Some(timeout) = config.close_timeout {
        result.close_timeout_secs = timeout;
    }
    if let Some(metrics) = config.metrics {
        if let Some(enabled) = metrics.enabled {
            result.metrics.enabled = enabled;
        }
        if let Some(delay) = metrics.startup_delay {
            result.metrics.startup_delay_secs = delay;
        }
        if let Some(interval) = metrics.interval {
            result.metrics.interval_secs = interval;
        }
        if let Some(timeout) = metrics.ping_timeout {
            result.metrics.ping_timeout_secs = timeout;
        }
    }
    if let Some(thresholds) = config.thresholds {
        result.thresholds = thresholds;
    }
}

fn apply_cli_options(result: &mut ManagerConfig, cli: CliOptions) {
    if let Some(host) = cli.host {
        result.host = host;
    }
    if let Some(port) = cli.port {
        result.port = port;
    }
    if let Some(startup) = cli.startup {
        result.startup = startup;
    }
    if cli.webhook_url.is_some() {
        result.webhook_url = cli.webhook_url;
    }
    if cli.no_metrics == Some(true) {
        result.metrics.enabled = false;
    }
    if let Some(spawn) = cli.spawn_workers {
        result.spawn_workers = spawn;
    }
}

/// Check a merged configuration for values the manager cannot run with.
pub fn validate_config(config: &ManagerConfig) -> Result<(), ConfigError> {
    if config.host.trim().is_empty() {
        return Err(ConfigError::invalid("host", "must not be empty"));
    }
    if config.launcher.program.trim().is_empty() {
        return Err(ConfigError::invalid("launcher.program", "must not be empty"));
    }

    let durations = [
        ("responseTimeout", config.response_timeout_secs),
        ("closeTimeout", config.close_timeout_secs),
        ("metrics.startupDelay", config.metrics.startup_delay_secs),
        ("metrics.interval", config.metrics.interval_secs),
        ("metrics.pingTimeout", config.metrics.ping_timeout_secs),
    ];
    for (field, secs) in durations {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::invalid(field, format!("{} is not a valid duration", secs)));
        }
    }
    if config.metrics.interval_secs == 0.0 {
        return Err(ConfigError::invalid("metrics.interval", "must be positive"));
    }

    for name in &config.startup {
        if name.is_empty() || name == MANAGER_NAME || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid("startup", format!("invalid worker name {:?}", name)));
        }
    }
    Ok(())
}
