//! Resource cache keyed by (resource_type, account, region, query).
//!
//! Three implementations share one trait: a content-addressed file store
//! ([`FileCache`]), a per-process map for platforms without usable file
//! locking ([`MemoryCache`]), and a disabled mode ([`NoCache`]) where reads
//! always miss and writes are no-ops.

pub mod file;
pub mod key;
pub mod memory;

pub use file::FileCache;
pub use key::CacheKey;
pub use memory::{MemoryCache, NoCache};

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Default entry TTL: 15 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Entries older than this multiple of the TTL are removed by [`ResourceCache::sweep`].
pub const SWEEP_TTL_FACTOR: u32 = 7;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not acquire cache lock for {0}")]
    Lock(String),
}

/// The cache contract the resource manager programs against.
///
/// TTL is compared at read time; expired entries are ignored but not
/// deleted (a separate [`sweep`](ResourceCache::sweep) removes entries older
/// than 7× TTL). Load failures of any sort are treated as a miss, never an
/// error: the cache is an optimization, enumeration is the authority.
pub trait ResourceCache: Send + Sync {
    /// Read an unexpired entry, if present.
    fn load(&self, key: &CacheKey) -> Option<Vec<Value>>;

    /// Write an entry, replacing any previous value for the key.
    fn store(&self, key: &CacheKey, values: &[Value]) -> Result<(), CacheError>;

    /// Remove entries older than 7× TTL. Returns the number removed.
    fn sweep(&self) -> Result<usize, CacheError>;

    fn stats(&self) -> CacheStatsSnapshot;
}

pub type SharedCache = Arc<dyn ResourceCache>;

/// Lock-free hit/miss/store counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}
