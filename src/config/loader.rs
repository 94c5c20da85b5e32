// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the working
//! directory and the user's home.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::manager::types::{Thresholds, DEFAULT_HOST, DEFAULT_PORT, NAME_PLACEHOLDER, PORT_PLACEHOLDER};

use super::types::{LauncherFileConfig, ManagerFileConfig, MetricsFileConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["marvin.yaml", "marvin.yml", "marvin.json", "configs/marvin.yaml"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".marvin";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.marvin/config.yaml.
pub fn load_global_config() -> Result<Option<ManagerFileConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Path of the first workspace config file present in `workspace_root`.
pub fn find_workspace_config(workspace_root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|filename| workspace_root.join(filename))
        .find(|path| path.exists())
}

/// Load workspace configuration from the workspace root.
///
/// Searches for config files in the following order:
/// 1. marvin.yaml
/// 2. marvin.yml
/// 3. marvin.json
/// 4. configs/marvin.yaml
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<ManagerFileConfig>, ConfigError> {
    match find_workspace_config(workspace_root) {
        Some(path) => load_config_file(&path).map(Some),
        None => Ok(None),
    }
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<ManagerFileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "json" => serde_json::from_str(&content).map_err(ConfigError::from),
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        other => Err(ConfigError::InvalidFormat(format!(
            "{}: unsupported extension {:?}",
            path.display(),
            other
        ))),
    }
}

/// Save configuration to `path`, as YAML or JSON by extension.
pub fn save_config_file(path: &Path, config: &ManagerFileConfig) -> Result<(), ConfigError> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::to_string_pretty(config)?,
        _ => serde_yaml::to_string(config)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Write an example marvin.yaml into `workspace_root`.
///
/// Refuses to overwrite an existing workspace config.
pub fn init_config(workspace_root: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = find_workspace_config(workspace_root) {
        return Err(ConfigError::invalid(
            "path",
            format!("{} already exists", existing.display()),
        ));
    }
    let path = workspace_root.join(CONFIG_FILES[0]);
    save_config_file(&path, &get_example_config())?;
    Ok(path)
}

/// Get an example configuration.
pub fn get_example_config() -> ManagerFileConfig {
    ManagerFileConfig {
        host: Some(DEFAULT_HOST.to_string()),
        port: Some(DEFAULT_PORT),
        startup: Some(vec!["bulbe".to_string()]),
        webhook_url: None,
        launcher: Some(LauncherFileConfig {
            program: Some("marvin".to_string()),
            args: Some(vec![
                "worker".to_string(),
                NAME_PLACEHOLDER.to_string(),
                "--port".to_string(),
                PORT_PLACEHOLDER.to_string(),
            ]),
        }),
        spawn_workers: Some(true),
        response_timeout: Some(10.0),
        close_timeout: Some(10.0),
        metrics: Some(MetricsFileConfig {
            enabled: Some(true),
            startup_delay: Some(10.0),
            interval: Some(30.0),
            ping_timeout: Some(10.0),
        }),
        thresholds: Some(Thresholds::default()),
    }
}
