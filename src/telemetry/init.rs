// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for the manager and worker processes.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// How a process logs.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when `RUST_LOG` is not set.
    pub default_level: Level,
    /// Log span enter/close.
    pub include_span_events: bool,
    pub include_file_line: bool,
    pub ansi_colors: bool,
    pub compact: bool,
    /// Append a plain-text copy of every line to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            ansi_colors: true,
            compact: true,
            log_file: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output for `--debug`.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            compact: false,
            ..Self::default()
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_level.to_string()))
    }
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Call once at process startup.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<()> {
    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let console = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);
    let console = if config.compact {
        console.compact().boxed()
    } else {
        console.boxed()
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(file_layer)
        .with(console)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Per-process log file: `<dir>/<name>/<stamp>.log`.
pub fn log_file_path(dir: impl Into<PathBuf>, name: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%m-%d_%Hh%Mm");
    dir.into().join(name).join(format!("{}.log", stamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.compact);
        assert!(config.log_file.is_none());

        let config = TelemetryConfig::development().with_log_file("/tmp/marvin.log");
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(!config.compact);
        assert!(config.ansi_colors);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/marvin.log")));
    }

    #[test]
    fn test_log_file_path_layout() {
        let path = log_file_path("/var/log/bots", "bulbe");
        assert!(path.starts_with("/var/log/bots/bulbe"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("log"));
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(dir.path(), "bulbe");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_init_with_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager").join("run.log");
        let config = TelemetryConfig {
            ansi_colors: false,
            ..TelemetryConfig::default()
        }
        .with_log_file(&path);

        // Only the first subscriber in a test binary installs.
        let _ = init_telemetry(&config);
        assert!(path.exists());
    }
}
