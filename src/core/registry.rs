//! Live-connection registry and metrics.
//!
//! One record per open socket, created at accept time and removed on close.
//! Counter updates racing a close are tolerated as no-ops. The registry is
//! the only state shared across connection tasks besides the ban store, so
//! every access goes through one lock.
//!
//! Aggregate totals (connections accepted, currently active, errors seen)
//! are kept alongside the per-connection records and surfaced by the admin
//! `stats` command.

use crate::error::{constants, MuxError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;
use uuid::Uuid;

/// Opaque unique identifier for a live connection. Never reused while the
/// registry is alive.
pub type ConnectionId = String;

#[derive(Debug, Clone)]
struct ConnectionRecord {
    seq: u64,
    started_at: SystemTime,
    bytes_received: u64,
    error_count: u64,
}

/// Point-in-time view of one connection's record.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub started_at: SystemTime,
    pub bytes_received: u64,
    pub error_count: u64,
}

/// Aggregate counters across the registry's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Connections ever registered
    pub total_connections: u64,
    /// Connections currently registered
    pub active_connections: u64,
    /// Errors recorded against any connection
    pub total_errors: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    next_seq: u64,
    total_connections: u64,
    total_errors: u64,
}

/// Table of currently open connections and their cumulative metrics.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record for a newly accepted connection and return its id.
    ///
    /// The record is visible to `snapshot()` immediately.
    pub fn register(&self) -> Result<ConnectionId> {
        let mut inner = self.lock()?;
        let id = Uuid::new_v4().to_string();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_connections += 1;
        inner.connections.insert(
            id.clone(),
            ConnectionRecord {
                seq,
                started_at: SystemTime::now(),
                bytes_received: 0,
                error_count: 0,
            },
        );
        Ok(id)
    }

    /// Add `n` to a connection's byte counter.
    ///
    /// A missing id is not an error: a data event may race the close that
    /// already removed the record.
    pub fn record_bytes(&self, id: &str, n: u64) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(record) = inner.connections.get_mut(id) {
            record.bytes_received += n;
        }
        Ok(())
    }

    /// Increment a connection's error counter. Missing ids are tolerated.
    pub fn record_error(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.total_errors += 1;
        if let Some(record) = inner.connections.get_mut(id) {
            record.error_count += 1;
        }
        Ok(())
    }

    /// Remove a connection's record. Idempotent.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.connections.remove(id);
        Ok(())
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.connections.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Point-in-time copy of every record, in insertion order.
    ///
    /// The order is stable within one snapshot but carries no other meaning.
    pub fn snapshot(&self) -> Result<Vec<ConnectionSnapshot>> {
        let inner = self.lock()?;
        let mut entries: Vec<(&ConnectionId, &ConnectionRecord)> =
            inner.connections.iter().collect();
        entries.sort_by_key(|(_, record)| record.seq);
        Ok(entries
            .into_iter()
            .map(|(id, record)| ConnectionSnapshot {
                id: id.clone(),
                started_at: record.started_at,
                bytes_received: record.bytes_received,
                error_count: record.error_count,
            })
            .collect())
    }

    /// Aggregate counters at this instant.
    pub fn aggregate(&self) -> Result<AggregateStats> {
        let inner = self.lock()?;
        Ok(AggregateStats {
            total_connections: inner.total_connections,
            active_connections: inner.connections.len() as u64,
            total_errors: inner.total_errors,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| MuxError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))
    }
}
