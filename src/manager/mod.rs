// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bot-fleet supervision.
//!
//! The [`Manager`] launches worker bots, keeps one verified socket
//! connection per worker, relays messages between them and watches their
//! resource usage.
//!
//! # Components
//!
//! - [`ipc`] - Framing, the wire protocol and the worker-side client
//! - [`registry`] - Worker records and connection binding
//! - [`dispatch`] - Routing and the command set workers may invoke
//! - [`correlator`] - Matching responses to outstanding requests
//! - [`process`] - Launching, finding and stopping worker processes
//! - [`metrics`], [`health`], [`notify`] - Sampling, thresholds and alerts
//!
//! # Example
//!
//! ```rust,ignore
//! use marvin::manager::{Manager, ManagerConfig};
//!
//! let manager = Manager::new(ManagerConfig::default())?;
//! manager.run().await?;
//! ```

pub mod correlator;
pub mod dispatch;
pub mod health;
pub mod ipc;
pub mod metrics;
pub mod notify;
pub mod process;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use correlator::{Response, ResponseCorrelator};
pub use dispatch::{Command, CommandError};
pub use health::{Alert, HealthMonitor};
pub use ipc::{IpcError, Message, MessageType, WorkerClient};
pub use metrics::{MetricsSnapshot, MetricsSource, SysinfoSource};
pub use notify::{AlertSink, LogSink, Report, WebhookSink};
pub use process::{CommandLauncher, Launcher, ProcessHandle};
pub use supervisor::{Collaborators, Manager, ManagerError, WorkerEvent};
pub use types::{
    LauncherConfig, ManagerConfig, MetricsConfig, PingResult, Thresholds, WorkerStatus,
    DEFAULT_PORT, MANAGER_NAME,
};
