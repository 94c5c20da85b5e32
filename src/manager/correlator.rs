// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request/response correlation.
//!
//! A request is keyed by `(recipient, timestamp)`. The answer comes back
//! from that recipient with the request's timestamp echoed inside its
//! details, which yields the same key. Each key resolves at most once;
//! a waiter that times out removes its key so late answers are reported
//! as unmatched instead of leaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// `(peer name, request timestamp)`.
pub type CorrelationKey = (String, String);

/// Build a correlation key.
pub fn key(peer: impl Into<String>, timestamp: impl Into<String>) -> CorrelationKey {
    (peer.into(), timestamp.into())
}

/// A resolved response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `true` for `success`.
    pub status: bool,
    /// Response details with `status` and `timestamp` removed.
    pub details: Map<String, Value>,
}

impl Response {
    pub fn new(status: bool, details: Map<String, Value>) -> Self {
        Self { status, details }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

struct PendingSlot {
    /// Distinguishes a re-registered key from the original waiter.
    id: u64,
    tx: oneshot::Sender<Response>,
}

/// Table of outstanding requests.
#[derive(Clone, Default)]
pub struct ResponseCorrelator {
    pending: Arc<Mutex<HashMap<CorrelationKey, PendingSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. Must happen before the request is sent.
    ///
    /// Registering a key that is already pending replaces the earlier
    /// waiter, which then resolves to nothing.
    pub async fn register(&self, key: CorrelationKey) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().await;
        if pending.insert(key.clone(), PendingSlot { id, tx }).is_some() {
            warn!(peer = %key.0, timestamp = %key.1, "Replaced pending request with the same key");
        }
        PendingResponse {
            key,
            id,
            rx,
            correlator: self.clone(),
        }
    }

    /// Deliver a response. Returns false when nobody waits on `key`.
    pub async fn resolve(&self, key: &CorrelationKey, response: Response) -> bool {
        let slot = self.pending.lock().await.remove(key);
        match slot {
            Some(slot) => {
                // The waiter may have given up between removal and send.
                slot.tx.send(response).is_ok()
            }
            None => false,
        }
    }

    /// Drop a pending key. The waiter resolves to nothing.
    pub async fn cancel(&self, key: &CorrelationKey) -> bool {
        self.pending.lock().await.remove(key).is_some()
    }

    pub async fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.pending.lock().await.contains_key(key)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn expire(&self, key: &CorrelationKey, id: u64) {
        let mut pending = self.pending.lock().await;
        if pending.get(key).map(|slot| slot.id) == Some(id) {
            pending.remove(key);
        }
    }
}

/// A registered request waiting for its response.
pub struct PendingResponse {
    key: CorrelationKey,
    id: u64,
    rx: oneshot::Receiver<Response>,
    correlator: ResponseCorrelator,
}

impl PendingResponse {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait up to `timeout` for the response.
    pub async fn wait(self, timeout: Duration) -> Option<Response> {
        let PendingResponse {
            key,
            id,
            rx,
            correlator,
        } = self;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!(peer = %key.0, "Pending request dropped");
                None
            }
            Err(_) => {
                correlator.expire(&key, id).await;
                debug!(peer = %key.0, timestamp = %key.1, "Timed out waiting for response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok() -> Response {
        Response::new(true, Map::new())
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register(key("bulbe", "t1")).await;

        let mut details = Map::new();
        details.insert("discordPing".into(), json!(0.04));
        assert!(correlator.resolve(&key("bulbe", "t1"), Response::new(true, details)).await);
        assert!(!correlator.resolve(&key("bulbe", "t1"), ok()).await);

        let response = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert!(response.status);
        assert_eq!(response.get("discordPing"), Some(&json!(0.04)));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_key() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register(key("bulbe", "t1")).await;

        assert!(pending.wait(Duration::from_millis(20)).await.is_none());
        assert!(!correlator.is_pending(&key("bulbe", "t1")).await);

        // A late answer finds no waiter.
        assert!(!correlator.resolve(&key("bulbe", "t1"), ok()).await);
    }

    #[tokio::test]
    async fn test_keys_are_per_peer() {
        let correlator = ResponseCorrelator::new();
        let bulbe = correlator.register(key("bulbe", "t1")).await;
        let juan = correlator.register(key("juan", "t1")).await;

        assert!(correlator.resolve(&key("juan", "t1"), Response::new(false, Map::new())).await);
        assert!(!juan.wait(Duration::from_secs(1)).await.unwrap().status);
        assert!(correlator.is_pending(bulbe.key()).await);
    }

    #[tokio::test]
    async fn test_reregister_replaces_waiter() {
        let correlator = ResponseCorrelator::new();
        let first = correlator.register(key("bulbe", "t1")).await;
        let second = correlator.register(key("bulbe", "t1")).await;

        assert!(first.wait(Duration::from_millis(50)).await.is_none());
        // The first waiter's expiry must not remove the second's slot.
        assert!(correlator.is_pending(second.key()).await);
        assert!(correlator.resolve(&key("bulbe", "t1"), ok()).await);
        assert!(second.wait(Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_cancel() {
        let correlator = ResponseCorrelator::new();
        let pending = correlator.register(key("bulbe", "t1")).await;
        assert!(correlator.cancel(&key("bulbe", "t1")).await);
        assert!(pending.wait(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_resolution() {
        let correlator = ResponseCorrelator::new();
        let mut waiters = Vec::new();
        for i in 0..20 {
            let pending = correlator.register(key("bulbe", format!("t{}", i))).await;
            waiters.push(tokio::spawn(pending.wait(Duration::from_secs(2))));
        }

        for i in (0..20).rev() {
            let c = correlator.clone();
            tokio::spawn(async move {
                c.resolve(&key("bulbe", format!("t{}", i)), ok()).await;
            });
        }

        for waiter in waiters {
            assert!(waiter.await.unwrap().is_some());
        }
    }
}
