//! Ban store boundary.
//!
//! The authoritative ban list lives outside this core; the trait below is
//! the adapter surface the connection handler and the admin server talk to.
//! Every call may fail with `StoreUnavailable`, and what happens to an
//! accept while the store is down is a policy decision, not a constant.
//!
//! `MemoryBanStore` is the in-process mirror used on its own in tests and
//! small deployments. A mirror must reflect mutations immediately: a banned
//! IP is rejected on the very next accept.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// What the accept path does when the ban store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BanPolicy {
    /// Admit the connection and log the store failure (default).
    FailOpen,
    /// Reject the connection while the store cannot be queried.
    FailClosed,
}

/// Adapter interface to the external ban-list collaborator.
#[async_trait]
pub trait BanStore: Send + Sync {
    /// Is this IP currently banned?
    async fn contains(&self, ip: IpAddr) -> Result<bool>;

    /// Ban an IP. Banning an already-banned IP is a no-op.
    async fn add(&self, ip: IpAddr) -> Result<()>;

    /// Lift a ban. Returns whether the IP was present.
    async fn remove(&self, ip: IpAddr) -> Result<bool>;

    /// All currently banned IPs.
    async fn list(&self) -> Result<Vec<IpAddr>>;
}

/// In-memory ban store; entries carry their creation time.
#[derive(Debug, Default)]
pub struct MemoryBanStore {
    entries: Mutex<HashMap<IpAddr, SystemTime>>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn contains(&self, ip: IpAddr) -> Result<bool> {
        Ok(self.entries.lock().await.contains_key(&ip))
    }

    async fn add(&self, ip: IpAddr) -> Result<()> {
        self.entries
            .lock()
            .await
            .entry(ip)
            .or_insert_with(SystemTime::now);
        Ok(())
    }

    async fn remove(&self, ip: IpAddr) -> Result<bool> {
        Ok(self.entries.lock().await.remove(&ip).is_some())
    }

    async fn list(&self) -> Result<Vec<IpAddr>> {
        let mut ips: Vec<IpAddr> = self.entries.lock().await.keys().copied().collect();
        ips.sort();
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn add_then_contains() {
        let store = MemoryBanStore::new();
        assert!(!store.contains(ip("10.0.0.5")).await.unwrap());

        store.add(ip("10.0.0.5")).await.unwrap();
        assert!(store.contains(ip("10.0.0.5")).await.unwrap());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = MemoryBanStore::new();
        store.add(ip("10.0.0.5")).await.unwrap();
        store.add(ip("10.0.0.5")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let store = MemoryBanStore::new();
        store.add(ip("192.168.1.9")).await.unwrap();

        assert!(store.remove(ip("192.168.1.9")).await.unwrap());
        assert!(!store.remove(ip("192.168.1.9")).await.unwrap());
        assert!(!store.contains(ip("192.168.1.9")).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_sorted_and_complete() {
        let store = MemoryBanStore::new();
        store.add(ip("10.0.0.2")).await.unwrap();
        store.add(ip("10.0.0.1")).await.unwrap();
        store.add(ip("::1")).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        let mut sorted = listed.clone();
        sorted.sort();
        assert_eq!(listed, sorted);
    }
}
