// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! marvin - supervisor for a fleet of chat-bot workers.
//!
//! The manager launches one process per worker bot, accepts a persistent
//! socket connection from each, relays messages between them and watches
//! their resource usage, reporting anomalies to a webhook.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`manager`] - The fleet manager, its IPC layer and the worker client
//! - [`config`] - Configuration loading and merging
//! - [`error`] - Configuration errors
//! - [`telemetry`] - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use marvin::config::{load_config, CliOptions};
//! use marvin::manager::Manager;
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let manager = Manager::new(config)?;
//! manager.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::ConfigError;
pub use manager::{
    Manager, ManagerConfig, ManagerError, Message, MessageType, WorkerClient, WorkerEvent,
    WorkerStatus,
};

/// marvin version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
