// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of known workers.
//!
//! A record is created when a worker is started (unbound), gains a
//! connection once the worker verifies, and is marked closed on graceful
//! close or kill. Only an unexpected disconnect removes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::ipc::Connection;
use super::process::ProcessHandle;
use super::types::WorkerStatus;

/// Why a connection could not be bound to a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("unknown worker: {0}")]
    Unknown(String),

    #[error("worker already bound: {0}")]
    AlreadyBound(String),

    #[error("worker closed: {0}")]
    Closed(String),
}

/// One registered worker.
pub struct WorkerRecord {
    pub name: String,
    connection: Option<Arc<Connection>>,
    process: Option<Arc<Mutex<ProcessHandle>>>,
    pub started_at: DateTime<Local>,
    pub bound_at: Option<DateTime<Local>>,
    pub closed_at: Option<DateTime<Local>>,
    watch_task: Option<JoinHandle<()>>,
}

impl WorkerRecord {
    pub fn new(name: impl Into<String>, process: Option<ProcessHandle>) -> Self {
        Self {
            name: name.into(),
            connection: None,
            process: process.map(|p| Arc::new(Mutex::new(p))),
            started_at: Local::now(),
            bound_at: None,
            closed_at: None,
            watch_task: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.is_bound() && !self.is_closed()
    }

    pub fn status(&self) -> WorkerStatus {
        if self.is_closed() {
            WorkerStatus::Closed
        } else if self.is_bound() {
            WorkerStatus::Active
        } else {
            WorkerStatus::Unbound
        }
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.clone()
    }

    pub fn process(&self) -> Option<Arc<Mutex<ProcessHandle>>> {
        self.process.clone()
    }

    /// Attach the watch task for `connection`. The task is handed back if
    /// the record is closed, bound elsewhere or already watched.
    fn set_watch_task(&mut self, connection: &Arc<Connection>, task: JoinHandle<()>) -> Result<(), JoinHandle<()>> {
        let bound_here = self.connection.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection));
        if self.is_closed() || !bound_here || self.watch_task.is_some() {
            return Err(task);
        }
        self.watch_task = Some(task);
        Ok(())
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            name: self.name.clone(),
            status: self.status(),
            started_at: self.started_at,
            closed_at: self.closed_at,
            process: self.process(),
        }
    }
}

impl std::fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("started_at", &self.started_at)
            .field("closed_at", &self.closed_at)
            .finish()
    }
}

/// What a close or kill needs from a record after it was marked closed.
pub struct Retired {
    pub connection: Option<Arc<Connection>>,
    pub process: Option<Arc<Mutex<ProcessHandle>>>,
    pub watch_task: Option<JoinHandle<()>>,
    /// Whether the record had already been closed before.
    pub was_closed: bool,
}

/// A point-in-time view of a record.
#[derive(Clone)]
pub struct WorkerInfo {
    pub name: String,
    pub status: WorkerStatus,
    pub started_at: DateTime<Local>,
    pub closed_at: Option<DateTime<Local>>,
    pub process: Option<Arc<Mutex<ProcessHandle>>>,
}

/// Name-keyed worker records.
#[derive(Default)]
pub struct Registry {
    workers: RwLock<HashMap<String, WorkerRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless a live (not closed) record has the name.
    /// A closed record is replaced.
    pub async fn insert(&self, record: WorkerRecord) -> Result<(), WorkerRecord> {
        let mut workers = self.workers.write().await;
        if let Some(existing) = workers.get(&record.name) {
            if !existing.is_closed() {
                return Err(record);
            }
        }
        workers.insert(record.name.clone(), record);
        Ok(())
    }

    /// Insert a record built by `build` if no live record has the name.
    /// `build` runs under the write lock so check and insert are atomic.
    pub async fn insert_with<E>(
        &self,
        name: &str,
        build: impl FnOnce() -> Result<WorkerRecord, E>,
    ) -> Result<bool, E> {
        let mut workers = self.workers.write().await;
        if workers.get(name).is_some_and(|r| !r.is_closed()) {
            return Ok(false);
        }
        let record = build()?;
        workers.insert(name.to_string(), record);
        Ok(true)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.workers.read().await.contains_key(name)
    }

    pub async fn status(&self, name: &str) -> Option<WorkerStatus> {
        self.workers.read().await.get(name).map(WorkerRecord::status)
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.workers
            .read()
            .await
            .get(name)
            .is_some_and(WorkerRecord::is_active)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn list(&self) -> Vec<(String, WorkerStatus)> {
        let workers = self.workers.read().await;
        let mut list: Vec<_> = workers
            .iter()
            .map(|(name, record)| (name.clone(), record.status()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub async fn info(&self, name: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(name).map(WorkerRecord::info)
    }

    /// The connection of an active worker.
    pub async fn active_connection(&self, name: &str) -> Option<Arc<Connection>> {
        let workers = self.workers.read().await;
        workers
            .get(name)
            .filter(|r| r.is_active())
            .and_then(WorkerRecord::connection)
    }

    /// Bind a verified connection. Check and attach happen under one write
    /// lock, so of several concurrent binds for a name exactly one succeeds.
    pub async fn try_bind(&self, name: &str, connection: Arc<Connection>) -> Result<(), BindError> {
        let mut workers = self.workers.write().await;
        let record = workers
            .get_mut(name)
            .ok_or_else(|| BindError::Unknown(name.to_string()))?;
        if record.is_bound() {
            return Err(BindError::AlreadyBound(name.to_string()));
        }
        if record.is_closed() {
            return Err(BindError::Closed(name.to_string()));
        }
        record.connection = Some(connection);
        record.bound_at = Some(Local::now());
        Ok(())
    }

    /// Detach `connection` if it is still the one bound to `name`.
    pub async fn unbind(&self, name: &str, connection: &Arc<Connection>) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(record) if record.connection.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) => {
                record.connection = None;
                record.bound_at = None;
                true
            }
            _ => false,
        }
    }

    /// Attach the task watching `connection`. The task is aborted instead
    /// if the worker was closed, removed or rebound in the meantime.
    pub async fn set_watch_task(&self, name: &str, connection: &Arc<Connection>, task: JoinHandle<()>) -> bool {
        let mut workers = self.workers.write().await;
        let rejected = match workers.get_mut(name) {
            Some(record) => record.set_watch_task(connection, task),
            None => Err(task),
        };
        match rejected {
            Ok(()) => true,
            Err(task) => {
                task.abort();
                false
            }
        }
    }

    /// Mark a worker closed and hand back what must be torn down.
    pub async fn retire(&self, name: &str) -> Option<Retired> {
        let mut workers = self.workers.write().await;
        let record = workers.get_mut(name)?;
        let was_closed = record.is_closed();
        if !was_closed {
            record.closed_at = Some(Local::now());
        }
        Some(Retired {
            connection: record.connection.clone(),
            process: record.process.clone(),
            watch_task: record.watch_task.take(),
            was_closed,
        })
    }

    /// Remove a record after its connection dropped unexpectedly.
    ///
    /// Only removes it if `connection` is still the bound one and the record
    /// was not closed on purpose. Returns true if removed.
    pub async fn remove_disconnected(&self, name: &str, connection: &Arc<Connection>) -> bool {
        let mut workers = self.workers.write().await;
        let matches = workers.get(name).is_some_and(|r| {
            !r.is_closed() && r.connection.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection))
        });
        if matches {
            workers.remove(name);
        }
        matches
    }

    /// Names of records that are not closed.
    pub async fn open_names(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut names: Vec<String> = workers
            .values()
            .filter(|r| !r.is_closed())
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }
}
