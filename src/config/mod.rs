// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for marvin.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.marvin/config.yaml
//! - Workspace config: marvin.yaml, marvin.yml, marvin.json or configs/marvin.yaml
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod types;

// Re-export public types
pub use loader::{
    find_workspace_config, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_workspace_config, save_config_file,
    CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, validate_config, CliOptions};

pub use types::{LauncherFileConfig, ManagerFileConfig, MetricsFileConfig};

use crate::error::ConfigError;
use crate::manager::types::ManagerConfig;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading.
pub fn load_config(workspace_root: &Path, cli_options: CliOptions) -> Result<ManagerConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    let config = merge_config(global, workspace, cli_options);
    validate_config(&config)?;
    Ok(config)
}

/// Like [`load_config`], but with an explicit file in place of the
/// workspace search.
pub fn load_config_from(path: &Path, cli_options: CliOptions) -> Result<ManagerConfig, ConfigError> {
    let global = load_global_config()?;
    let file = load_config_file(path)?;

    let config = merge_config(global, Some(file), cli_options);
    validate_config(&config)?;
    Ok(config)
}
