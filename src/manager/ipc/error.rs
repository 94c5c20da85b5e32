// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! IPC error types for manager-worker communication.

use std::io;
use thiserror::Error;

/// Errors that can occur in the IPC subsystem.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to bind the listening socket.
    #[error("Failed to bind IPC endpoint: {0}")]
    BindFailed(String),

    /// Failed to connect to the manager.
    #[error("Failed to connect to IPC endpoint: {0}")]
    ConnectFailed(String),

    /// The connection has no writer bound (never attached, or closed).
    #[error("Connection not bound: {0}")]
    NotBound(String),

    /// Identity handshake was refused or malformed.
    #[error("IPC handshake failed: {0}")]
    HandshakeFailed(String),

    /// The named worker has no active connection.
    #[error("Worker not connected: {0}")]
    WorkerNotConnected(String),

    /// A frame exceeded the size limit.
    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    /// Invalid message received or built.
    #[error("Invalid IPC message: {0}")]
    InvalidMessage(String),

    /// Connection closed unexpectedly.
    #[error("IPC connection closed unexpectedly")]
    ConnectionClosed,

    /// Timeout waiting for the peer.
    #[error("IPC operation timed out")]
    Timeout,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General transport error.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl IpcError {
    /// Create an IPC error from an IO error with context.
    pub fn from_io_error(context: &str, err: io::Error) -> Self {
        IpcError::Transport(format!("{}: {}", context, err))
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::Serialization(err.to_string())
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
