//! In-process cache fallback and the disabled cache.

use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;

use crate::key::CacheKey;
use crate::{CacheError, CacheStats, CacheStatsSnapshot, DEFAULT_TTL, ResourceCache, SWEEP_TTL_FACTOR};

/// Per-process cache for platforms without usable advisory file locking.
///
/// Same TTL semantics as [`crate::FileCache`], no persistence.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, (i64, Vec<Value>)>,
    ttl: Duration,
    stats: CacheStats,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: DEFAULT_TTL,
            stats: CacheStats::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn age(written_at: i64) -> Duration {
        let age = OffsetDateTime::now_utc().unix_timestamp() - written_at;
        Duration::from_secs(age.max(0) as u64)
    }
}

impl ResourceCache for MemoryCache {
    fn load(&self, key: &CacheKey) -> Option<Vec<Value>> {
        let address = key.address();
        if let Some(entry) = self.entries.get(&address) {
            let (written_at, values) = entry.value();
            if Self::age(*written_at) <= self.ttl {
                self.stats.record_hit();
                return Some(values.clone());
            }
        }
        self.stats.record_miss();
        None
    }

    fn store(&self, key: &CacheKey, values: &[Value]) -> Result<(), CacheError> {
        self.entries.insert(
            key.address(),
            (OffsetDateTime::now_utc().unix_timestamp(), values.to_vec()),
        );
        self.stats.record_store();
        Ok(())
    }

    fn sweep(&self) -> Result<usize, CacheError> {
        let horizon = self.ttl * SWEEP_TTL_FACTOR;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| Self::age(e.value().0) > horizon)
            .map(|e| e.key().clone())
            .collect();
        let removed = stale.len();
        for address in stale {
            self.entries.remove(&address);
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Disabled cache: reads always miss, writes are no-ops.
#[derive(Debug, Default)]
pub struct NoCache {
    stats: CacheStats,
}

impl NoCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceCache for NoCache {
    fn load(&self, _key: &CacheKey) -> Option<Vec<Value>> {
        self.stats.record_miss();
        None
    }

    fn store(&self, _key: &CacheKey, _values: &[Value]) -> Result<(), CacheError> {
        Ok(())
    }

    fn sweep(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
