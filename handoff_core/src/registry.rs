//! Host registry: the authoritative set of known peers.
//!
//! Written by discovery, the transfer server and manual adds from the UI;
//! read by the UI through a watch feed that only fires on visible changes.

use crate::error::{TransferError, TransferResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, watch};

/// One known peer.
#[derive(Debug, Clone)]
pub struct Host {
    /// Normalized `ip:port`, unique key
    pub address: String,
    pub hostname: String,
    pub username: String,
    /// Learned from the network (true) or entered by the user (false)
    pub discovered: bool,
    pub busy: bool,
    pub timestamp: Instant,
}

impl Host {
    pub fn discovered(address: &str, hostname: &str, username: &str) -> Self {
        Self {
            address: address.to_string(),
            hostname: hostname.to_string(),
            username: username.to_string(),
            discovered: true,
            busy: false,
            timestamp: Instant::now(),
        }
    }

    pub fn manual(hostname: &str, address: &str) -> Self {
        Self {
            discovered: false,
            ..Self::discovered(address, hostname, "")
        }
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            address: self.address.clone(),
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            discovered: self.discovered,
            busy: self.busy,
        }
    }
}

/// The part of a host the UI renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub address: String,
    pub hostname: String,
    pub username: String,
    pub discovered: bool,
    pub busy: bool,
}

pub struct HostRegistry {
    hosts: RwLock<HashMap<String, Host>>,
    feed: watch::Sender<Vec<HostSnapshot>>,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        let (feed, _) = watch::channel(Vec::new());
        Self {
            hosts: RwLock::new(HashMap::new()),
            feed,
        }
    }

    /// Subscribe to the visible host set. The receiver is notified only when
    /// an entry is added or removed, flips busy, or changes its metadata.
    pub fn subscribe(&self) -> watch::Receiver<Vec<HostSnapshot>> {
        self.feed.subscribe()
    }

    fn publish(&self, hosts: &HashMap<String, Host>) -> bool {
        let mut snapshot: Vec<HostSnapshot> = hosts.values().map(Host::snapshot).collect();
        snapshot.sort_by(|a, b| a.address.cmp(&b.address));
        self.feed.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        })
    }

    /// Merge `host` into an existing record or insert it.
    fn merge(hosts: &mut HashMap<String, Host>, host: Host) {
        match hosts.get_mut(&host.address) {
            Some(existing) => {
                if !host.hostname.is_empty() {
                    existing.hostname = host.hostname;
                }
                if !host.username.is_empty() {
                    existing.username = host.username;
                }
                existing.timestamp = existing.timestamp.max(host.timestamp);
            }
            None => {
                hosts.insert(host.address.clone(), host);
            }
        }
    }

    /// Insert or refresh by address. The stored `discovered` and `busy`
    /// flags win over the incoming ones. Returns true if the visible set changed.
    pub async fn upsert(&self, host: Host) -> bool {
        let mut hosts = self.hosts.write().await;
        Self::merge(&mut hosts, host);
        self.publish(&hosts)
    }

    /// Insert or pin a host as manually entered, overriding `discovered`.
    pub async fn upsert_manual(&self, hostname: &str, address: &str) -> bool {
        let mut hosts = self.hosts.write().await;
        match hosts.get_mut(address) {
            Some(existing) => {
                existing.discovered = false;
                if !hostname.is_empty() {
                    existing.hostname = hostname.to_string();
                }
                existing.timestamp = Instant::now();
            }
            None => {
                hosts.insert(address.to_string(), Host::manual(hostname, address));
            }
        }
        self.publish(&hosts)
    }

    /// Upsert `host` and mark it busy in one step.
    ///
    /// Fails with `HostBusy`, leaving the registry untouched, if the host
    /// already takes part in a transaction.
    pub async fn reserve(&self, host: Host) -> TransferResult<()> {
        let mut hosts = self.hosts.write().await;
        if hosts.get(&host.address).is_some_and(|h| h.busy) {
            return Err(TransferError::HostBusy(host.address));
        }
        let address = host.address.clone();
        Self::merge(&mut hosts, host);
        if let Some(entry) = hosts.get_mut(&address) {
            entry.busy = true;
        }
        self.publish(&hosts);
        Ok(())
    }

    /// Mark an already known host busy.
    pub async fn reserve_existing(&self, address: &str) -> TransferResult<()> {
        let mut hosts = self.hosts.write().await;
        let entry = hosts
            .get_mut(address)
            .ok_or_else(|| TransferError::UnknownHost(address.to_string()))?;
        if entry.busy {
            return Err(TransferError::HostBusy(address.to_string()));
        }
        entry.busy = true;
        entry.timestamp = Instant::now();
        self.publish(&hosts);
        Ok(())
    }

    /// Set the busy flag. Returns false if the host is unknown.
    pub async fn mark_busy(&self, address: &str, busy: bool) -> bool {
        let mut hosts = self.hosts.write().await;
        let Some(entry) = hosts.get_mut(address) else {
            return false;
        };
        entry.busy = busy;
        entry.timestamp = Instant::now();
        self.publish(&hosts);
        true
    }

    pub async fn remove(&self, address: &str) -> Option<Host> {
        let mut hosts = self.hosts.write().await;
        let removed = hosts.remove(address);
        if removed.is_some() {
            self.publish(&hosts);
        }
        removed
    }

    /// Remove a host that takes part in no transaction.
    pub async fn remove_idle(&self, address: &str) -> TransferResult<Host> {
        let mut hosts = self.hosts.write().await;
        match hosts.get(address) {
            None => return Err(TransferError::UnknownHost(address.to_string())),
            Some(host) if host.busy => return Err(TransferError::HostBusy(address.to_string())),
            Some(_) => {}
        }
        let removed = hosts
            .remove(address)
            .ok_or_else(|| TransferError::UnknownHost(address.to_string()))?;
        self.publish(&hosts);
        Ok(removed)
    }

    pub async fn get(&self, address: &str) -> Option<Host> {
        self.hosts.read().await.get(address).cloned()
    }

    /// Snapshot of all hosts, sorted by address.
    pub async fn list(&self) -> Vec<HostSnapshot> {
        let hosts = self.hosts.read().await;
        let mut list: Vec<HostSnapshot> = hosts.values().map(Host::snapshot).collect();
        list.sort_by(|a, b| a.address.cmp(&b.address));
        list
    }

    pub async fn len(&self) -> usize {
        self.hosts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hosts.read().await.is_empty()
    }

    /// Evict discovered, idle hosts not refreshed within `ttl` of `now`.
    /// Manual and busy hosts are kept. Returns the evicted addresses.
    pub async fn sweep_stale(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let mut hosts = self.hosts.write().await;
        let mut evicted = Vec::new();
        hosts.retain(|address, host| {
            let stale = host.discovered
                && !host.busy
                && now.saturating_duration_since(host.timestamp) > ttl;
            if stale {
                evicted.push(address.clone());
            }
            !stale
        });
        if !evicted.is_empty() {
            self.publish(&hosts);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: &str = "192.168.1.10:56934";
    const ADDR_B: &str = "192.168.1.11:56934";

    #[tokio::test]
    async fn test_address_stays_unique() {
        let registry = HostRegistry::new();
        registry.upsert(Host::discovered(ADDR_A, "alpha", "alice")).await;
        registry.upsert(Host::discovered(ADDR_A, "alpha-renamed", "alice")).await;
        registry.upsert_manual("manual", ADDR_A).await;
        registry.upsert(Host::discovered(ADDR_B, "beta", "bob")).await;

        let list = registry.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].address, ADDR_A);
        assert_eq!(list[0].hostname, "manual");
        assert!(!list[0].discovered, "manual add overrides discovered");
    }

    #[tokio::test]
    async fn test_upsert_preserves_flags() {
        let registry = HostRegistry::new();
        registry.upsert_manual("pinned", ADDR_A).await;
        registry.mark_busy(ADDR_A, true).await;

        registry.upsert(Host::discovered(ADDR_A, "pinned", "alice")).await;
        let host = registry.get(ADDR_A).await.unwrap();
        assert!(!host.discovered);
        assert!(host.busy);
        assert_eq!(host.username, "alice");
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_discovered_idle_hosts() {
        let registry = HostRegistry::new();
        let ttl = Duration::from_secs(15);
        registry.upsert(Host::discovered(ADDR_A, "alpha", "alice")).await;
        registry.upsert(Host::discovered(ADDR_B, "beta", "bob")).await;
        registry.upsert_manual("gamma", "192.168.1.12:56934").await;
        registry.mark_busy(ADDR_B, true).await;

        // Nothing is stale yet
        assert!(registry.sweep_stale(Instant::now(), ttl).await.is_empty());

        let later = Instant::now() + ttl + Duration::from_secs(1);
        let evicted = registry.sweep_stale(later, ttl).await;
        assert_eq!(evicted, vec![ADDR_A.to_string()]);
        assert_eq!(registry.len().await, 2);

        // Once idle, the busy host ages out too; the manual one never does
        registry.mark_busy(ADDR_B, false).await;
        let much_later = Instant::now() + ttl * 4;
        let evicted = registry.sweep_stale(much_later, ttl).await;
        assert_eq!(evicted, vec![ADDR_B.to_string()]);
        assert_eq!(registry.list().await[0].hostname, "gamma");
    }

    #[tokio::test]
    async fn test_reserve_excludes_second_transaction() {
        let registry = HostRegistry::new();
        registry
            .reserve(Host::discovered(ADDR_A, "alpha", "alice"))
            .await
            .unwrap();
        let err = registry
            .reserve(Host::discovered(ADDR_A, "alpha", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::HostBusy(_)));

        registry.mark_busy(ADDR_A, false).await;
        assert!(registry.reserve_existing(ADDR_A).await.is_ok());
        assert!(matches!(
            registry.reserve_existing(ADDR_B).await,
            Err(TransferError::UnknownHost(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_fires_only_on_visible_changes() {
        let registry = HostRegistry::new();
        let mut feed = registry.subscribe();

        assert!(registry.upsert(Host::discovered(ADDR_A, "alpha", "alice")).await);
        assert!(feed.has_changed().unwrap());
        assert_eq!(feed.borrow_and_update().len(), 1);

        // Pure timestamp refresh is invisible
        assert!(!registry.upsert(Host::discovered(ADDR_A, "alpha", "alice")).await);
        assert!(!feed.has_changed().unwrap());

        registry.mark_busy(ADDR_A, true).await;
        assert!(feed.has_changed().unwrap());
        assert!(feed.borrow_and_update()[0].busy);

        registry.remove(ADDR_A).await;
        assert!(feed.borrow_and_update().is_empty());
    }
}
