// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One framed link between two named endpoints.
//!
//! Used by the manager (one per accepted worker) and by workers (one to the
//! manager). Sends are serialized by a writer lock so frames never
//! interleave; receives are expected from a single task.

use std::sync::OnceLock;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::error::{IpcError, IpcResult};
use super::protocol::{decode, decode_identity, encode, Message, DELIMITER};
use super::transport::IpcStream;

/// Largest message frame accepted, without its delimiter.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// Largest identity frame accepted, without its delimiter.
pub const MAX_IDENTITY_BYTES: usize = 256;

/// Outcome of a single receive.
#[derive(Debug)]
pub enum Received {
    /// A well-formed message.
    Message(Message),
    /// A frame that did not decode to a message map. The link stays usable.
    Malformed(String),
    /// End of stream, an empty frame, a truncated trailing frame, an
    /// oversized frame, or a read error.
    Closed,
}

/// A framed, named, bidirectional connection.
pub struct Connection {
    /// Our name, written into `from` of outgoing messages.
    local: String,
    /// The peer's name once known, written into `to` of outgoing messages.
    peer: OnceLock<String>,
    reader: Mutex<BufReader<ReadHalf<IpcStream>>>,
    /// `None` once closed.
    writer: Mutex<Option<WriteHalf<IpcStream>>>,
}

impl Connection {
    pub fn new(local: impl Into<String>, stream: IpcStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            local: local.into(),
            peer: OnceLock::new(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(Some(write_half)),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn peer_name(&self) -> Option<&str> {
        self.peer.get().map(String::as_str)
    }

    /// Record the peer's name. Returns false if it was already set.
    pub fn set_peer(&self, name: impl Into<String>) -> bool {
        self.peer.set(name.into()).is_ok()
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }

    /// Read one raw frame of at most `limit` bytes, without its delimiter.
    ///
    /// Returns `None` at end of stream or when the peer hung up mid-frame.
    async fn read_frame(&self, limit: usize) -> IpcResult<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        let mut frame = Vec::new();
        let n = (&mut *reader)
            .take(limit as u64 + 1)
            .read_until(DELIMITER, &mut frame)
            .await
            .map_err(|e| IpcError::from_io_error("reading frame", e))?;

        if n == 0 {
            return Ok(None);
        }
        if frame.last() != Some(&DELIMITER) {
            if frame.len() > limit {
                return Err(IpcError::FrameTooLarge(limit));
            }
            debug!(bytes = frame.len(), "Discarding truncated trailing frame");
            return Ok(None);
        }
        frame.pop();
        Ok(Some(frame))
    }

    /// Read the identity frame a worker sends right after connecting.
    ///
    /// Returns `Ok(None)` if the stream ends first or the token is not a
    /// usable name.
    pub async fn read_identity(&self) -> IpcResult<Option<String>> {
        match self.read_frame(MAX_IDENTITY_BYTES).await? {
            Some(frame) => Ok(decode_identity(&frame)),
            None => Ok(None),
        }
    }

    /// Read the next raw frame as text. Used for the handshake ack.
    pub async fn read_text(&self) -> IpcResult<Option<String>> {
        match self.read_frame(MAX_FRAME_BYTES).await? {
            Some(frame) => Ok(Some(String::from_utf8_lossy(&frame).into_owned())),
            None => Ok(None),
        }
    }

    /// Receive the next message.
    pub async fn receive(&self) -> Received {
        let frame = match self.read_frame(MAX_FRAME_BYTES).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Received::Closed,
            Err(e) => {
                warn!(local = %self.local, "Read failed: {}", e);
                return Received::Closed;
            }
        };

        if frame.is_empty() {
            return Received::Closed;
        }

        match decode(&frame) {
            Ok(msg) => {
                trace!(local = %self.local, from = %msg.from, kind = %msg.kind, "Received message");
                Received::Message(msg)
            }
            Err(e) => Received::Malformed(e.to_string()),
        }
    }

    /// Write pre-encoded bytes as-is.
    pub async fn write_raw(&self, bytes: &[u8]) -> IpcResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| IpcError::NotBound(self.describe()))?;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| IpcError::from_io_error("sending frame", e))?;
        writer
            .flush()
            .await
            .map_err(|e| IpcError::from_io_error("flushing writer", e))?;
        Ok(())
    }

    /// Send a message, filling empty `to`, `from` and `timestamp`.
    ///
    /// Returns the message as sent, so callers can correlate on its
    /// timestamp.
    pub async fn send(&self, mut msg: Message) -> IpcResult<Message> {
        let peer = self.peer_name().unwrap_or_default();
        msg.fill(peer, &self.local);
        if msg.to.is_empty() {
            return Err(IpcError::InvalidMessage("message has no recipient".to_string()));
        }

        let frame = encode(&msg)?;
        self.write_raw(&frame).await?;
        trace!(local = %self.local, to = %msg.to, kind = %msg.kind, "Sent message");
        Ok(msg)
    }

    /// Close the write side and release it. Idempotent.
    pub async fn close(&self) -> IpcResult<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer
                .shutdown()
                .await
                .map_err(|e| IpcError::from_io_error("closing connection", e))?;
            debug!(local = %self.local, peer = ?self.peer_name(), "Connection closed");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.local, self.peer_name().unwrap_or("?"))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local)
            .field("peer", &self.peer_name())
            .finish()
    }
}
