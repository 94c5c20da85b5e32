// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resource sampling for the machine, the manager and its workers.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;
use sysinfo::{Networks, Pid, System};

/// Byte counters. For the machine these are network totals, for a process
/// disk IO totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IoBytes {
    pub read: u64,
    pub write: u64,
}

impl IoBytes {
    pub fn total(&self) -> u64 {
        self.read + self.write
    }
}

/// Whole-machine sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemSample {
    /// Average CPU usage across cores, percent.
    pub cpu: f64,
    /// Used memory, percent of total.
    pub memory: f64,
    pub io_bytes: IoBytes,
}

/// Single-process sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub status: String,
    /// CPU usage normalized by core count, percent.
    pub cpu: f64,
    /// Resident memory, percent of total.
    pub memory: f64,
    pub io_bytes: IoBytes,
}

/// Source of resource samples.
///
/// Readings come from the last [`refresh`](MetricsSource::refresh), so CPU
/// usage covers the time between two refreshes. Implementations may block.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSource: Send + Sync {
    /// Take a new reading of the machine and its processes.
    fn refresh(&self);

    fn sample_system(&self) -> SystemSample;

    /// `None` if no process has this PID.
    fn sample_process(&self, pid: u32) -> Option<ProcessSample>;
}

struct Readings {
    system: System,
    network: IoBytes,
}

/// Samples from the OS via `sysinfo`.
pub struct SysinfoSource {
    readings: Mutex<Readings>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            readings: Mutex::new(Readings {
                system: System::new_all(),
                network: IoBytes::default(),
            }),
        }
    }

    fn readings(&self) -> MutexGuard<'_, Readings> {
        match self.readings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoSource {
    fn refresh(&self) {
        let networks = Networks::new_with_refreshed_list();
        let mut network = IoBytes::default();
        for (_name, data) in &networks {
            network.read += data.total_received();
            network.write += data.total_transmitted();
        }

        let mut readings = self.readings();
        readings.system.refresh_all();
        readings.network = network;
    }

    fn sample_system(&self) -> SystemSample {
        let readings = self.readings();
        let system = &readings.system;

        let cpus = system.cpus();
        let cpu = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
        };

        SystemSample {
            cpu,
            memory: percent(system.used_memory(), system.total_memory()),
            io_bytes: readings.network,
        }
    }

    fn sample_process(&self, pid: u32) -> Option<ProcessSample> {
        let readings = self.readings();
        let system = &readings.system;

        let cores = system.cpus().len().max(1) as f64;
        let process = system.process(Pid::from_u32(pid))?;
        let disk = process.disk_usage();

        Some(ProcessSample {
            status: process.status().to_string(),
            cpu: process.cpu_usage() as f64 / cores,
            memory: percent(process.memory(), system.total_memory()),
            io_bytes: IoBytes {
                read: disk.total_read_bytes,
                write: disk.total_written_bytes,
            },
        })
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// One observation of a subject (`system`, `manager` or a worker), as
/// evaluated by the health loop and reported in alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub who: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub io_bytes: Option<IoBytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Local>>,
    /// Socket round trip, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_ping: Option<f64>,
    /// Chat-platform latency reported by the worker, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_ping: Option<f64>,
}

impl MetricsSnapshot {
    /// A snapshot with no readings.
    pub fn empty(who: impl Into<String>) -> Self {
        Self {
            who: who.into(),
            ..Default::default()
        }
    }

    pub fn from_system(sample: SystemSample) -> Self {
        Self {
            who: "system".to_string(),
            cpu: Some(sample.cpu),
            memory: Some(sample.memory),
            io_bytes: Some(sample.io_bytes),
            ..Default::default()
        }
    }

    pub fn from_process(who: impl Into<String>, sample: ProcessSample) -> Self {
        Self {
            who: who.into(),
            status: Some(sample.status),
            cpu: Some(sample.cpu),
            memory: Some(sample.memory),
            io_bytes: Some(sample.io_bytes),
            ..Default::default()
        }
    }

    /// Wall time from start to stop (or now, if still running).
    pub fn uptime(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let ended = self.stopped_at.unwrap_or_else(Local::now);
        Some(ended - started)
    }
}
