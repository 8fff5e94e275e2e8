//! Content-addressed file store.
//!
//! Layout: `<dir>/<first-2-hex>/<hash>.cache` holds the gzip-compressed
//! JSON list of resources; `<hash>.meta` holds the write timestamp and the
//! key fields. Writers serialize through a per-key lock file and land data
//! through a temp file + atomic rename, so readers never observe a torn
//! entry and can go lock-free. A corrupt or unreadable entry is a miss.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::key::CacheKey;
use crate::{CacheError, CacheStats, CacheStatsSnapshot, DEFAULT_TTL, ResourceCache, SWEEP_TTL_FACTOR};

/// Sidecar metadata stored next to each entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    written_at: i64,
    resource_type: String,
    account_id: String,
    region: String,
}

#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
    stats: CacheStats,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_TTL,
            stats: CacheStats::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn shard_dir(&self, address: &str) -> PathBuf {
        self.dir.join(&address[..2])
    }

    fn data_path(&self, address: &str) -> PathBuf {
        self.shard_dir(address).join(format!("{address}.cache"))
    }

    fn meta_path(&self, address: &str) -> PathBuf {
        self.shard_dir(address).join(format!("{address}.meta"))
    }

    fn lock_path(&self, address: &str) -> PathBuf {
        self.shard_dir(address).join(format!("{address}.lock"))
    }

    fn read_meta(&self, address: &str) -> Option<EntryMeta> {
        let raw = fs::read(self.meta_path(address)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn entry_age(&self, meta: &EntryMeta) -> Duration {
        let age = OffsetDateTime::now_utc().unix_timestamp() - meta.written_at;
        Duration::from_secs(age.max(0) as u64)
    }

    fn write_entry(&self, key: &CacheKey, values: &[Value]) -> Result<(), CacheError> {
        let address = key.address();
        fs::create_dir_all(self.shard_dir(&address))?;

        let _lock = LockFile::acquire(self.lock_path(&address))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serde_json::to_vec(values)?)?;
        let compressed = encoder.finish()?;

        let data_path = self.data_path(&address);
        let tmp_path = data_path.with_extension("cache.tmp");
        fs::write(&tmp_path, compressed)?;
        fs::rename(&tmp_path, &data_path)?;

        let meta = EntryMeta {
            written_at: OffsetDateTime::now_utc().unix_timestamp(),
            resource_type: key.resource_type.clone(),
            account_id: key.account_id.clone(),
            region: key.region.clone(),
        };
        fs::write(self.meta_path(&address), serde_json::to_vec(&meta)?)?;
        Ok(())
    }
}

impl ResourceCache for FileCache {
    fn load(&self, key: &CacheKey) -> Option<Vec<Value>> {
        let address = key.address();

        let meta = match self.read_meta(&address) {
            Some(meta) => meta,
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        if self.entry_age(&meta) > self.ttl {
            // Expired entries are ignored, not deleted; sweep handles removal.
            debug!(resource_type = %key.resource_type, "cache entry expired");
            self.stats.record_miss();
            return None;
        }

        let result = fs::read(self.data_path(&address)).ok().and_then(|raw| {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut buf = Vec::new();
            decoder.read_to_end(&mut buf).ok()?;
            serde_json::from_slice::<Vec<Value>>(&buf).ok()
        });

        match result {
            Some(values) => {
                self.stats.record_hit();
                Some(values)
            }
            None => {
                warn!(resource_type = %key.resource_type, "unreadable cache entry, treating as miss");
                self.stats.record_miss();
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, values: &[Value]) -> Result<(), CacheError> {
        self.write_entry(key, values)?;
        self.stats.record_store();
        Ok(())
    }

    fn sweep(&self) -> Result<usize, CacheError> {
        let horizon = self.ttl * SWEEP_TTL_FACTOR;
        let mut removed = 0;

        let shards = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for shard in shards.flatten() {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard_path)?.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let Some(address) = path.file_stem().and_then(|s| s.to_str()).map(String::from)
                else {
                    continue;
                };
                let expired = self
                    .read_meta(&address)
                    .map(|meta| self.entry_age(&meta) > horizon)
                    // Meta unreadable: the entry can never hit, reap it.
                    .unwrap_or(true);
                if expired {
                    let _ = fs::remove_file(self.data_path(&address));
                    let _ = fs::remove_file(&path);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Advisory per-key lock: exists while held, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    const ATTEMPTS: u32 = 50;
    const RETRY_DELAY: Duration = Duration::from_millis(10);

    fn acquire(path: PathBuf) -> Result<Self, CacheError> {
        for _ in 0..Self::ATTEMPTS {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(Self::RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CacheError::Lock(path.display().to_string()))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
