//! Content-addressed result cache
//!
//! Scan results are cached under `scan_cache:<hex sha256>` where the
//! digest covers the lowercased target and the sorted port set, so the
//! same request hashes identically regardless of port order. TTLs follow
//! the target classification: private and loopback addresses change
//! rarely and cache for six hours, public ones for one.
//!
//! The store is dual-backend: an optional external key-value backend plus
//! a mandatory in-process map. Backend failures degrade to the in-process
//! twin -- no cache operation ever fails the caller. Values over 4 KiB
//! are gzip-compressed with a flag byte in the envelope.
//!
//! Single-flight coordination hands out per-key async locks; the cache
//! holds no global lock and lookups are lock-free reads.

use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use netscout_core::{CacheConfig, PortResult, Result, TargetClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::{Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Serialized values above this size are gzip-compressed
const COMPRESS_THRESHOLD: usize = 4096;

/// Envelope flag bytes
const RAW: u8 = 0;
const GZIP: u8 = 1;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pluggable external key-value backend
///
/// Object-safe with boxed futures; the in-process fallback implements the
/// same interface.
pub trait KvStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;
    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> BoxFuture<'a, Result<()>>;
    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// In-process expiring map, the mandatory fallback backend
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (Vec<u8>, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            if let Some(entry) = self.entries.get(key) {
                let (value, expires) = entry.value();
                if Instant::now() < *expires {
                    return Ok(Some(value.clone()));
                }
            }
            // Expired entries are dropped on the read path
            self.entries.remove_if(key, |_, (_, expires)| Instant::now() >= *expires);
            Ok(None)
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entries
                .insert(key.to_string(), (value, Instant::now() + ttl));
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.entries.clear();
            Ok(())
        })
    }
}

/// A cached scan result set; immutable after write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub results: Vec<PortResult>,
    pub stored_at: DateTime<Utc>,
    pub ttl_s: u64,
    /// Set from the envelope flag on load
    #[serde(skip)]
    pub compressed: bool,
}

/// Cache observability counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    #[serde(rename = "stored")]
    pub stores: u64,
    pub hit_rate: f64,
}

/// The process-wide scan result cache
pub struct ScanCache {
    external: Option<Arc<dyn KvStore>>,
    fallback: MemoryStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl ScanCache {
    /// In-process cache only
    pub fn new(config: CacheConfig) -> Self {
        Self {
            external: None,
            fallback: MemoryStore::new(),
            locks: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Cache backed by an external store, with the in-process fallback
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn KvStore>) -> Self {
        let mut cache = Self::new(config);
        cache.external = Some(backend);
        cache
    }

    /// Derive the content-addressed key for a request
    ///
    /// Insensitive to port order and target case.
    pub fn key(target: &str, ports: &netscout_core::PortSet) -> String {
        let mut hasher = Sha256::new();
        hasher.update(target.to_ascii_lowercase().as_bytes());
        hasher.update(b"|");
        let sorted: Vec<String> = ports.sorted().iter().map(|p| p.to_string()).collect();
        hasher.update(sorted.join(",").as_bytes());
        format!("scan_cache:{:x}", hasher.finalize())
    }

    /// TTL for a target classification
    pub fn ttl_for(&self, class: TargetClass) -> Duration {
        if class.is_private() {
            Duration::from_secs(self.config.private_ttl_s)
        } else {
            Duration::from_secs(self.config.public_ttl_s)
        }
    }

    /// Acquire the single-flight lock for a key
    ///
    /// Concurrent scans of the same key serialize on this lock; the
    /// holders that arrive late re-check the cache and replay instead of
    /// probing. State is local to this process and released on drop.
    pub async fn key_lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Look up a cached entry; never fails
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let raw = match &self.external {
            Some(backend) => match backend.get(key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("cache backend get failed, using in-process fallback: {}", e);
                    self.fallback.get(key).await.ok().flatten()
                }
            },
            None => self.fallback.get(key).await.ok().flatten(),
        };

        let entry = raw.and_then(|bytes| match decode_entry(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("discarding undecodable cache entry {}: {}", key, e);
                None
            }
        });

        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("cache hit for {}", key);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store results under a key; never fails
    pub async fn store(&self, key: &str, results: &[PortResult], class: TargetClass) {
        let ttl = self.ttl_for(class);
        let entry = CacheEntry {
            results: results.to_vec(),
            stored_at: Utc::now(),
            ttl_s: ttl.as_secs(),
            compressed: false,
        };

        let bytes = match encode_entry(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode cache entry {}: {}", key, e);
                return;
            }
        };

        self.stores.fetch_add(1, Ordering::Relaxed);
        if let Some(backend) = &self.external {
            if let Err(e) = backend.put(key, bytes.clone(), ttl).await {
                warn!("cache backend put failed, using in-process fallback: {}", e);
                let _ = self.fallback.put(key, bytes, ttl).await;
            }
        } else {
            let _ = self.fallback.put(key, bytes, ttl).await;
        }
    }

    /// Drop everything from both backends
    pub async fn invalidate_all(&self) {
        if let Some(backend) = &self.external {
            if let Err(e) = backend.clear().await {
                warn!("cache backend clear failed: {}", e);
            }
        }
        let _ = self.fallback.clear().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            stores: self.stores.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// Envelope: one flag byte, then raw or gzipped JSON
fn encode_entry(entry: &CacheEntry) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;
    if json.len() > COMPRESS_THRESHOLD {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .and_then(|_| encoder.finish())
            .map(|compressed| {
                let mut out = Vec::with_capacity(compressed.len() + 1);
                out.push(GZIP);
                out.extend_from_slice(&compressed);
                out
            })
            .map_err(netscout_core::Error::from)
    } else {
        let mut out = Vec::with_capacity(json.len() + 1);
        out.push(RAW);
        out.extend_from_slice(&json);
        Ok(out)
    }
}

fn decode_entry(bytes: &[u8]) -> Result<CacheEntry> {
    let (flag, payload) = bytes
        .split_first()
        .ok_or_else(|| netscout_core::Error::Serialization("empty cache value".to_string()))?;
    let json = match *flag {
        RAW => payload.to_vec(),
        GZIP => {
            let mut decoder = GzDecoder::new(payload);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        }
        other => {
            return Err(netscout_core::Error::Serialization(format!(
                "unknown cache envelope flag {}",
                other
            )))
        }
    };
    let mut entry: CacheEntry = serde_json::from_slice(&json)?;
    entry.compressed = *flag == GZIP;
    Ok(entry)
}
