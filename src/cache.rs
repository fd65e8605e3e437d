// src/cache.rs
//! Villager status cache
//!
//! Maps villager identity to an [`AgentStatus`] view so hot villagers do not
//! get a fresh view built on every chunk sweep. Entries expire a fixed time
//! after they were last written, regardless of how often they are read, which
//! bounds how long a view can outlive changes made behind its back.
//!
//! The cache is never authoritative: a missing or expired entry is rebuilt from
//! the live villager's persisted attributes. Expired entries of villagers that
//! are never looked up again are swept every [`SWEEP_EVERY_WRITES`] writes.

use crate::host::{AgentId, AgentRef, HostRuntime};
use crate::status::{AgentStatus, StatusContext, StatusSnapshot};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Writes between sweeps of expired entries
pub const SWEEP_EVERY_WRITES: u64 = 128;

struct CacheEntry {
    status: AgentStatus,
    written: Instant,
}

impl CacheEntry {
    fn new(status: AgentStatus) -> Self {
        Self {
            status,
            written: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.written.elapsed() >= ttl
    }
}

/// Expire-after-write cache of status views
pub struct AgentCache {
    entries: DashMap<AgentId, CacheEntry>,
    expire_after_write: Duration,
    writes: AtomicU64,
    host: Arc<dyn HostRuntime>,
    ctx: Arc<StatusContext>,
}

impl AgentCache {
    pub fn new(host: Arc<dyn HostRuntime>, ctx: Arc<StatusContext>, expire_after_write: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expire_after_write,
            writes: AtomicU64::new(0),
            host,
            ctx,
        }
    }

    pub fn expire_after_write(&self) -> Duration {
        self.expire_after_write
    }

    /// Cached view, or a new one if the host can still resolve the villager
    pub fn get(&self, id: AgentId) -> Option<AgentStatus> {
        if let Some(status) = self.get_if_present(id) {
            return Some(status);
        }
        metrics::counter!("villager_optimizer_cache_misses_total").increment(1);

        let agent = self.host.resolve_agent(id)?;
        Some(self.add(agent))
    }

    /// Cached view for a live villager, refreshing its write time
    pub fn get_or_add(&self, agent: &AgentRef) -> AgentStatus {
        match self.get_if_present(agent.id()) {
            Some(status) => self.put(status),
            None => {
                metrics::counter!("villager_optimizer_cache_misses_total").increment(1);
                self.add(Arc::clone(agent))
            }
        }
    }

    /// Builds and stores a fresh view
    pub fn add(&self, agent: AgentRef) -> AgentStatus {
        self.put(AgentStatus::new(agent, Arc::clone(&self.ctx)))
    }

    /// Stores `status`, replacing any existing entry for the same villager
    pub fn put(&self, status: AgentStatus) -> AgentStatus {
        trace!("Caching status for villager {}", status.id());
        self.entries
            .insert(status.id(), CacheEntry::new(status.clone()));

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_WRITES == 0 {
            let purged = self.cleanup();
            if purged > 0 {
                debug!("Swept {} expired status entries", purged);
            }
        }
        status
    }

    /// Presence check that never consults the host
    pub fn contains(&self, id: AgentId) -> bool {
        self.get_if_present(id).is_some()
    }

    /// Every unexpired view
    pub fn get_all(&self) -> Vec<AgentStatus> {
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(self.expire_after_write))
            .map(|e| e.value().status.clone())
            .collect()
    }

    /// Snapshots of every unexpired view, serialized as a JSON array
    pub fn dump_json(&self) -> serde_json::Result<String> {
        let snapshots: Vec<StatusSnapshot> = self.get_all().iter().map(|s| s.snapshot()).collect();
        serde_json::to_string(&snapshots)
    }

    pub fn invalidate(&self, id: AgentId) {
        self.entries.remove(&id);
    }

    /// Drops expired entries, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.expire_after_write;
        self.entries.retain(|_, e| !e.is_expired(ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until cleaned up
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_if_present(&self, id: AgentId) -> Option<AgentStatus> {
        let ttl = self.expire_after_write;
        {
            let entry = self.entries.get(&id)?;
            if !entry.is_expired(ttl) {
                return Some(entry.status.clone());
            }
        }
        // Shard guard must be released before removing
        self.entries.remove_if(&id, |_, e| e.is_expired(ttl));
        None
    }
}
