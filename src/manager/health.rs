// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Threshold evaluation for the health loop.
//!
//! Alerts are edge-triggered per subject: the first sample over a threshold
//! raises one alert, later samples stay quiet until a sample comes back
//! fully under every threshold.

use std::collections::HashMap;

use tracing::debug;

use super::metrics::MetricsSnapshot;
use super::types::Thresholds;

/// Which threshold set applies to a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectClass {
    /// The machine as a whole.
    System,
    /// The manager process or a worker.
    Process,
}

/// A threshold breach that should be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub who: String,
    /// Names of the exceeded metrics.
    pub issues: Vec<&'static str>,
    pub snapshot: MetricsSnapshot,
}

impl Alert {
    pub fn description(&self) -> String {
        format!("{}: {} values exceeded threshold.", self.who, self.issues.len())
    }
}

/// Names of the metrics in `snapshot` at or over their threshold.
pub fn exceeded(snapshot: &MetricsSnapshot, class: SubjectClass, thresholds: &Thresholds) -> Vec<&'static str> {
    let checks: Vec<(&'static str, Option<f64>, Option<f64>)> = match class {
        SubjectClass::System => vec![
            ("cpu", snapshot.cpu, thresholds.system.cpu),
            ("memory", snapshot.memory, thresholds.system.memory),
        ],
        SubjectClass::Process => vec![
            ("cpu", snapshot.cpu, thresholds.worker.cpu),
            ("memory", snapshot.memory, thresholds.worker.memory),
            ("socketPing", snapshot.socket_ping, thresholds.worker.socket_ping),
            ("platformPing", snapshot.platform_ping, thresholds.worker.platform_ping),
        ],
    };

    checks
        .into_iter()
        .filter_map(|(name, value, limit)| match (value, limit) {
            (Some(value), Some(limit)) if value >= limit => Some(name),
            _ => None,
        })
        .collect()
}

/// Per-subject alert state and the day-rollover tracker.
#[derive(Debug)]
pub struct HealthMonitor {
    thresholds: Thresholds,
    /// Subject -> currently in breach.
    flags: HashMap<String, bool>,
    /// Day of month of the last summary.
    today: u32,
}

impl HealthMonitor {
    pub fn new(thresholds: Thresholds, today: u32) -> Self {
        Self {
            thresholds,
            flags: HashMap::new(),
            today,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn is_flagged(&self, who: &str) -> bool {
        self.flags.get(who).copied().unwrap_or(false)
    }

    /// Evaluate a sample. Returns an alert only on a clear-to-breach edge.
    pub fn evaluate(&mut self, class: SubjectClass, snapshot: &MetricsSnapshot) -> Option<Alert> {
        let issues = exceeded(snapshot, class, &self.thresholds);
        let was_flagged = self.is_flagged(&snapshot.who);

        if issues.is_empty() {
            self.flags.insert(snapshot.who.clone(), false);
            return None;
        }

        debug!(who = %snapshot.who, ?issues, "Thresholds exceeded");
        self.flags.insert(snapshot.who.clone(), true);
        if was_flagged {
            return None;
        }
        Some(Alert {
            who: snapshot.who.clone(),
            issues,
            snapshot: snapshot.clone(),
        })
    }

    /// Forget a subject, e.g. after its worker was removed.
    pub fn forget(&mut self, who: &str) {
        self.flags.remove(who);
    }

    /// Record the current day of month. Returns true when it changed.
    pub fn check_new_day(&mut self, day: u32) -> bool {
        if day == self.today {
            return false;
        }
        self.today = day;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::types::WorkerThresholds;

    fn system(cpu: f64, memory: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            who: "system".into(),
            cpu: Some(cpu),
            memory: Some(memory),
            ..Default::default()
        }
    }

    #[test]
    fn test_exceeded_uses_inclusive_limits() {
        let thresholds = Thresholds::default();
        assert_eq!(exceeded(&system(90.0, 10.0), SubjectClass::System, &thresholds), vec!["cpu"]);
        assert!(exceeded(&system(89.9, 89.9), SubjectClass::System, &thresholds).is_empty());
    }

    #[test]
    fn test_process_thresholds_include_pings() {
        let thresholds = Thresholds::default();
        let snapshot = MetricsSnapshot {
            who: "bulbe".into(),
            cpu: Some(1.0),
            memory: Some(1.0),
            socket_ping: Some(0.25),
            platform_ping: None,
            ..Default::default()
        };
        assert_eq!(exceeded(&snapshot, SubjectClass::Process, &thresholds), vec!["socketPing"]);
    }

    #[test]
    fn test_disabled_threshold_never_fires() {
        let thresholds = Thresholds {
            worker: WorkerThresholds {
                cpu: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let snapshot = MetricsSnapshot {
            who: "bulbe".into(),
            cpu: Some(400.0),
            ..Default::default()
        };
        assert!(exceeded(&snapshot, SubjectClass::Process, &thresholds).is_empty());
    }

    #[test]
    fn test_alerts_are_edge_triggered() {
        let mut monitor = HealthMonitor::new(Thresholds::default(), 1);

        let alert = monitor.evaluate(SubjectClass::System, &system(95.0, 10.0)).unwrap();
        assert_eq!(alert.who, "system");
        assert_eq!(alert.description(), "system: 1 values exceeded threshold.");

        // Still high: no repeat.
        assert!(monitor.evaluate(SubjectClass::System, &system(97.0, 95.0)).is_none());
        assert!(monitor.is_flagged("system"));

        // Clears, then breaches again: one new alert.
        assert!(monitor.evaluate(SubjectClass::System, &system(20.0, 10.0)).is_none());
        assert!(!monitor.is_flagged("system"));
        assert!(monitor.evaluate(SubjectClass::System, &system(99.0, 10.0)).is_some());
    }

    #[test]
    fn test_flags_are_per_subject() {
        let mut monitor = HealthMonitor::new(Thresholds::default(), 1);
        let busy = |who: &str| MetricsSnapshot {
            who: who.into(),
            cpu: Some(50.0),
            ..Default::default()
        };

        assert!(monitor.evaluate(SubjectClass::Process, &busy("bulbe")).is_some());
        assert!(monitor.evaluate(SubjectClass::Process, &busy("juan")).is_some());
        assert!(monitor.evaluate(SubjectClass::Process, &busy("bulbe")).is_none());

        monitor.forget("bulbe");
        assert!(monitor.evaluate(SubjectClass::Process, &busy("bulbe")).is_some());
    }

    #[test]
    fn test_check_new_day() {
        let mut monitor = HealthMonitor::new(Thresholds::default(), 17);
        assert!(!monitor.check_new_day(17));
        assert!(monitor.check_new_day(18));
        assert!(!monitor.check_new_day(18));
    }
}
