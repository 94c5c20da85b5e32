// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and logging infrastructure.
//!
//! Both the manager and worker processes log through `tracing`. Initialize
//! once at startup:
//!
//! ```rust,ignore
//! use marvin::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config)?;
//! ```
//!
//! # Integration Guidelines
//!
//! 1. **Record worker names as fields** (`worker = %name`) rather than
//!    interpolating them, so log lines can be filtered per bot.
//! 2. **Use appropriate log levels**: trace for frame payloads, debug for
//!    routing decisions, info for lifecycle events, warn/error for anomalies.

mod init;

pub use init::{init_telemetry, log_file_path, TelemetryConfig};
