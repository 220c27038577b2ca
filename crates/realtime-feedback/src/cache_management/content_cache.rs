//! Content-addressed provider result cache
//!
//! Keyed only by provider id and content hash, so identical buffers from
//! different sessions share an entry. Strict LRU eviction at a fixed capacity;
//! entries never expire by time.

use lru::LruCache;
use serde::Serialize;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::cache_management::cache_config::ContentCacheConfig;
use crate::error::CacheUnavailable;
use crate::feedback::{CursorPosition, ProviderResult};
use crate::utils::TextUtils;

/// Inputs besides the content that a provider's result depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashScope<'a> {
    pub cursor: Option<(CursorPosition, Option<char>)>,
    pub file_path: Option<&'a str>,
}

/// blake3 digest of a normalized provider input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash the content with line endings normalized, then fold in whatever
    /// the scope carries. Each scoped part is tagged so a path can never
    /// collide with a cursor.
    pub fn compute(content: &str, scope: HashScope<'_>) -> Self {
        let normalized = TextUtils::normalize_line_endings(content);
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized.as_bytes());
        if let Some((cursor, trigger)) = scope.cursor {
            hasher.update(b"\0cursor");
            hasher.update(&cursor.line.to_le_bytes());
            hasher.update(&cursor.column.to_le_bytes());
            if let Some(trigger) = trigger {
                let mut buf = [0u8; 4];
                hasher.update(trigger.encode_utf8(&mut buf).as_bytes());
            }
        }
        if let Some(path) = scope.file_path {
            hasher.update(b"\0path");
            hasher.update(&(path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider_id: String,
    hash: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ContentCache {
    config: ContentCacheConfig,
    entries: Mutex<LruCache<CacheKey, ProviderResult>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ContentCache {
    pub fn new(config: ContentCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        info!("Content cache initialized with capacity {}", capacity);
        Self {
            config,
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(ContentCacheConfig::with_capacity(max_entries))
    }

    /// Look up a prior result, promoting it to most recently used.
    pub fn get(&self, provider_id: &str, hash: &ContentHash) -> Result<Option<ProviderResult>, CacheUnavailable> {
        if !self.config.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let key = CacheKey {
            provider_id: provider_id.to_string(),
            hash: *hash,
        };
        let mut entries = self.entries.lock().map_err(|_| CacheUnavailable)?;
        match entries.get(&key) {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(result.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store a successful result. Failed results are ignored so a transient
    /// error is never replayed from cache.
    pub fn put(&self, provider_id: &str, hash: ContentHash, result: ProviderResult) -> Result<(), CacheUnavailable> {
        if !self.config.enabled || !result.success {
            return Ok(());
        }
        if !self.config.cache_empty_results && result.findings.is_empty() {
            return Ok(());
        }

        let key = CacheKey {
            provider_id: provider_id.to_string(),
            hash,
        };
        let mut entries = self.entries.lock().map_err(|_| CacheUnavailable)?;
        if let Some((evicted_key, _)) = entries.push(key.clone(), result) {
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Evicted cache entry for provider {} ({})",
                    evicted_key.provider_id, evicted_key.hash
                );
            }
        }
        Ok(())
    }

    pub fn contains(&self, provider_id: &str, hash: &ContentHash) -> bool {
        let key = CacheKey {
            provider_id: provider_id.to_string(),
            hash: *hash,
        };
        self.entries
            .lock()
            .map(|entries| entries.contains(&key))
            .unwrap_or(false)
    }

    /// Drop every entry produced by one provider, e.g. after its rules change.
    pub fn invalidate_provider(&self, provider_id: &str) -> Result<usize, CacheUnavailable> {
        let mut entries = self.entries.lock().map_err(|_| CacheUnavailable)?;
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.provider_id == provider_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        info!("Invalidated {} cache entries for provider {}", stale.len(), provider_id);
        Ok(stale.len())
    }

    pub fn clear(&self) -> Result<(), CacheUnavailable> {
        self.entries.lock().map_err(|_| CacheUnavailable)?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.entries.lock().unwrap();
            panic!("poison the cache lock");
        }));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.config.enabled,
            len: self.len(),
            capacity: self.capacity.get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
