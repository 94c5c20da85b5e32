// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! IPC (Inter-Process Communication) module for manager-worker communication.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐              ┌─────────────────┐
//! │     Manager     │              │     Worker      │
//! │                 │              │                 │
//! │  ┌───────────┐  │     TCP      │  ┌───────────┐  │
//! │  │Connection │◄─┼──────────────┼──│  Client   │  │
//! │  └───────────┘  │  localhost   │  └───────────┘  │
//! └─────────────────┘              └─────────────────┘
//! ```
//!
//! # Protocol
//!
//! Frames are terminated by a `\0` byte.
//!
//! 1. Worker sends its bare name.
//! 2. Manager answers `verified:<name>.` if the name is registered and not
//!    yet bound; otherwise it closes the socket without answering.
//! 3. Both sides exchange JSON maps with `type`, `to`, `from`, `timestamp`
//!    and `details`.
//!
//! ## Message types
//!
//! - `actionReq` - Command for the manager (`closeServer`, `closeBot`,
//!   `killBot`, `startBot`, `metrics`) or for another worker
//! - `dataReq` - Query (`metrics`)
//! - `ping` / `pong` - Liveness check and its answer
//! - `response` - Answer to a request, echoing its timestamp
//! - `summon` - Request for a stand-in bot

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::WorkerClient;
pub use connection::{Connection, Received};
pub use error::{IpcError, IpcResult};
pub use protocol::{
    decode, encode, now_timestamp, Message, MessageType, ResponseDetails, DELIMITER,
    PLATFORM_PING_KEY,
};
pub use transport::{IpcListener, IpcStream};
