// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! A config file holds a partial [`ManagerFileConfig`]; every field is
//! optional and unset fields fall through to the next source. JSON and
//! YAML are both accepted.

use serde::{Deserialize, Serialize};

use crate::manager::types::Thresholds;

/// Manager configuration as written in a config file.
/// Can be defined in marvin.yaml, marvin.json or configs/marvin.yaml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerFileConfig {
    /// Host to bind the listener to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Listener port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Workers started with the manager
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup: Option<Vec<String>>,

    /// Chat webhook that receives alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Worker command template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<LauncherFileConfig>,

    /// Spawn worker processes (false: register only and find them by
    /// command line)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_workers: Option<bool>,

    /// Response wait in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout: Option<f64>,

    /// Close grace period in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_timeout: Option<f64>,

    /// Health loop settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsFileConfig>,

    /// Alert thresholds; `null` disables a single check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
}

/// Worker command template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherFileConfig {
    /// Program to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments; `{name}` and `{port}` are substituted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Health loop settings, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_timeout: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
port: 9000
startup: [bulbe, juan]
spawnWorkers: false
launcher:
  program: /usr/bin/python3
  args: ["bots/{name}.py"]
metrics:
  interval: 60
thresholds:
  worker:
    cpu: 25
    platformPing: null
"#;
        let config: ManagerFileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.startup, Some(vec!["bulbe".to_string(), "juan".to_string()]));
        assert_eq!(config.spawn_workers, Some(false));
        assert_eq!(
            config.launcher.unwrap().args,
            Some(vec!["bots/{name}.py".to_string()])
        );
        assert_eq!(config.metrics.unwrap().interval, Some(60.0));

        let thresholds = config.thresholds.unwrap();
        assert_eq!(thresholds.worker.cpu, Some(25.0));
        assert_eq!(thresholds.worker.platform_ping, None);
        // Unset values keep their defaults.
        assert_eq!(thresholds.worker.memory, Some(30.0));
        assert_eq!(thresholds.system.cpu, Some(90.0));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"webhookUrl": "http://localhost/hook", "closeTimeout": 2.5}"#;
        let config: ManagerFileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.webhook_url.as_deref(), Some("http://localhost/hook"));
        assert_eq!(config.close_timeout, Some(2.5));
        assert!(config.port.is_none());
    }

    #[test]
    fn test_serialize_skips_unset() {
        let config = ManagerFileConfig {
            port: Some(8800),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"port":8800}"#);
    }
}
