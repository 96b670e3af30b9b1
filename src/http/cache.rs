//! Two-tier response cache
//!
//! Entries live in memory and are mirrored to `<directory>/<sha256(key)>.json`
//! so a restarted process can reuse them. Expiry is checked on every read.
//! When the size budget is exceeded the least recently used fifth of the
//! in-memory entries is evicted from both tiers. The disk tier is held to the
//! same byte and entry budget on every write, oldest files first, so entries
//! left by earlier processes count too.
//!
//! The cache is an optimization only: any I/O or serialization failure is
//! logged and handled as a miss or a no-op.

use crate::config::CacheConfig;
use crate::http::client::HttpResponse;
use crate::http::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache lock poisoned")]
    LockPoisoned,
}

/// On-disk representation of one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    stored_at: DateTime<Utc>,
    response: HttpResponse,
}

#[derive(Debug)]
struct MemoryEntry {
    stored: StoredEntry,
    /// Serialized size, `None` when it could not be computed
    size: Option<u64>,
    last_access: u64,
}

#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<String, MemoryEntry>,
    tick: u64,
}

impl MemoryTier {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    memory: Mutex<MemoryTier>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            memory: Mutex::new(MemoryTier::default()),
        }
    }

    /// Returns the cached response for `key` if present and not expired
    pub fn get(&self, key: &str) -> Option<HttpResponse> {
        match self.try_get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Stores a response under `key` with the current timestamp
    pub fn set(&self, key: &str, response: &HttpResponse) {
        if let Err(e) = self.try_set(key, response) {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Removes every entry from both tiers, returning how many files were deleted
    pub fn clear(&self) -> usize {
        if let Ok(mut memory) = self.memory.lock() {
            memory.entries.clear();
        }

        match self.disk_files() {
            Ok(files) => files
                .into_iter()
                .filter(|path| match std::fs::remove_file(path) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Failed to remove cache file {}: {}", path.display(), e);
                        false
                    }
                })
                .count(),
            Err(e) => {
                warn!("Failed to list cache directory: {}", e);
                0
            }
        }
    }

    /// Drops expired entries from both tiers, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.utc_now();
        let mut removed = 0;

        if let Ok(mut memory) = self.memory.lock() {
            let before = memory.entries.len();
            memory
                .entries
                .retain(|_, entry| !self.is_expired(entry.stored.stored_at, now));
            removed += before - memory.entries.len();
        }

        let files = match self.disk_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list cache directory: {}", e);
                return removed;
            }
        };

        for path in files {
            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str::<StoredEntry>(&content).ok())
                .map(|entry| self.is_expired(entry.stored_at, now))
                .unwrap_or(true);

            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        debug!("Removed {} expired cache entries", removed);
        removed
    }

    /// Trims the disk tier to the byte and entry budget, oldest files first
    ///
    /// Returns how many files were removed.
    pub fn enforce_disk_budget(&self) -> usize {
        self.trim_disk(None)
    }

    /// `keep` is never removed, so a fresh write survives its own trim
    fn trim_disk(&self, keep: Option<&Path>) -> usize {
        let files = match self.disk_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list cache directory: {}", e);
                return 0;
            }
        };

        let mut by_age: Vec<(SystemTime, u64, PathBuf)> = files
            .into_iter()
            .filter(|path| Some(path.as_path()) != keep)
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                let modified = meta.modified().unwrap_or(UNIX_EPOCH);
                Some((modified, meta.len(), path))
            })
            .collect();
        by_age.sort();

        let kept_bytes = keep
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len())
            .unwrap_or(0);
        let mut total_bytes: u64 = kept_bytes + by_age.iter().map(|(_, len, _)| len).sum::<u64>();
        let mut count = by_age.len() + usize::from(keep.is_some_and(|path| path.exists()));
        let mut removed = HashSet::new();

        for (_, len, path) in by_age {
            if total_bytes <= self.config.max_size_bytes() && count <= self.config.max_entries {
                break;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    total_bytes = total_bytes.saturating_sub(len);
                    count -= 1;
                    removed.insert(path);
                }
                Err(e) => warn!("Failed to remove cache file {}: {}", path.display(), e),
            }
        }

        if !removed.is_empty() {
            if let Ok(mut memory) = self.memory.lock() {
                memory
                    .entries
                    .retain(|key, _| !removed.contains(&self.disk_path(key)));
            }
            debug!("Trimmed {} files from the disk cache", removed.len());
        }
        removed.len()
    }

    /// Number of entries in the memory tier
    pub fn len(&self) -> usize {
        self.memory.lock().map(|m| m.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - stored_at >= self.config.ttl()
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.config
            .directory
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    fn disk_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        if !self.config.directory.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config.directory)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn try_get(&self, key: &str) -> Result<Option<HttpResponse>, CacheError> {
        let now = self.clock.utc_now();

        {
            let mut memory = self.memory.lock().map_err(|_| CacheError::LockPoisoned)?;
            let tick = memory.touch();
            let expired = match memory.entries.get_mut(key) {
                Some(entry) if !self.is_expired(entry.stored.stored_at, now) => {
                    entry.last_access = tick;
                    return Ok(Some(entry.stored.response.clone()));
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                memory.entries.remove(key);
            }
        }

        let path = self.disk_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let stored: StoredEntry = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        if stored.key != key {
            return Ok(None);
        }
        if self.is_expired(stored.stored_at, now) {
            std::fs::remove_file(&path)?;
            return Ok(None);
        }

        debug!("Promoting disk cache entry for {}", key);
        let response = stored.response.clone();
        self.insert_memory(stored)?;
        Ok(Some(response))
    }

    fn try_set(&self, key: &str, response: &HttpResponse) -> Result<(), CacheError> {
        let stored = StoredEntry {
            key: key.to_string(),
            stored_at: self.clock.utc_now(),
            response: response.clone(),
        };

        std::fs::create_dir_all(&self.config.directory)?;
        let content = serde_json::to_string(&stored)?;
        let path = self.disk_path(key);
        std::fs::write(&path, content)?;

        self.insert_memory(stored)?;
        self.trim_disk(Some(&path));
        Ok(())
    }

    fn insert_memory(&self, stored: StoredEntry) -> Result<(), CacheError> {
        let size = serde_json::to_vec(&stored).ok().map(|bytes| bytes.len() as u64);

        let mut memory = self.memory.lock().map_err(|_| CacheError::LockPoisoned)?;
        let tick = memory.touch();
        memory.entries.insert(
            stored.key.clone(),
            MemoryEntry {
                stored,
                size,
                last_access: tick,
            },
        );

        while self.over_budget(&memory) {
            self.evict_oldest_fifth(&mut memory);
        }
        Ok(())
    }

    fn over_budget(&self, memory: &MemoryTier) -> bool {
        let sizes: Option<u64> = memory.entries.values().map(|entry| entry.size).sum();
        match sizes {
            Some(total) => total > self.config.max_size_bytes(),
            None => memory.entries.len() > self.config.max_entries,
        }
    }

    fn evict_oldest_fifth(&self, memory: &mut MemoryTier) {
        let mut by_age: Vec<(u64, String)> = memory
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        by_age.sort();

        let count = by_age.len().div_ceil(5).max(1);
        for (_, key) in by_age.into_iter().take(count) {
            memory.entries.remove(&key);
            let path = self.disk_path(&key);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove evicted cache file {}: {}", path.display(), e);
                }
            }
        }
        debug!("Evicted {} cache entries", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::clock::ManualClock;
    use std::time::Duration;
    use tempfile::TempDir;

    fn response(url: &str, body: &str) -> HttpResponse {
        HttpResponse {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            body: body.to_string(),
        }
    }

    fn cache_config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            directory: dir.path().join("cache"),
            ..CacheConfig::default()
        }
    }

    #[test]
    fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(cache_config(&dir), Arc::new(ManualClock::new()));

        assert!(cache.get("https://a.example/1").is_none());
        cache.set("https://a.example/1", &response("https://a.example/1", "<html>1</html>"));

        let hit = cache.get("https://a.example/1").unwrap();
        assert_eq!(hit.body, "<html>1</html>");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_expires_after_ttl_without_cleanup() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let cache = CacheManager::new(cache_config(&dir), clock.clone());

        cache.set("k", &response("https://a.example/", "body"));
        clock.advance(Duration::from_secs(23 * 3600));
        assert!(cache.get("k").is_some());

        clock.advance(Duration::from_secs(3600));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disk_tier_survives_restart() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());

        let first = CacheManager::new(cache_config(&dir), clock.clone());
        first.set("k", &response("https://a.example/", "persisted"));
        drop(first);

        let second = CacheManager::new(cache_config(&dir), clock);
        assert!(second.is_empty());
        assert_eq!(second.get("k").unwrap().body, "persisted");
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_clear_removes_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(cache_config(&dir), Arc::new(ManualClock::new()));

        cache.set("a", &response("https://a.example/a", "a"));
        cache.set("b", &response("https://a.example/b", "b"));
        assert_eq!(cache.clear(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let cache = CacheManager::new(cache_config(&dir), clock.clone());

        cache.set("old", &response("https://a.example/old", "old"));
        clock.advance(Duration::from_secs(20 * 3600));
        cache.set("new", &response("https://a.example/new", "new"));
        clock.advance(Duration::from_secs(5 * 3600));

        // memory and disk copy of "old"
        assert_eq!(cache.cleanup_expired(), 2);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_lru_eviction_over_budget() {
        let dir = TempDir::new().unwrap();
        let mut config = cache_config(&dir);
        config.max_size_mb = 1;
        let cache = CacheManager::new(config, Arc::new(ManualClock::new()));

        let body = "x".repeat(200 * 1024);
        for i in 0..5 {
            let key = format!("https://a.example/{}", i);
            cache.set(&key, &response(&key, &body));
        }
        // keep entry 0 recently used
        assert!(cache.get("https://a.example/0").is_some());

        let key = "https://a.example/5".to_string();
        cache.set(&key, &response(&key, &body));

        assert!(cache.len() < 6);
        assert!(cache.get("https://a.example/0").is_some());
        assert!(cache.get("https://a.example/1").is_none());
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_restart_over_full_directory_stays_under_budget() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());

        let first = CacheManager::new(cache_config(&dir), clock.clone());
        for i in 0..10 {
            let key = format!("https://a.example/{}", i);
            first.set(&key, &response(&key, "left by an earlier run"));
        }
        drop(first);

        let mut config = cache_config(&dir);
        config.max_entries = 4;
        let second = CacheManager::new(config.clone(), clock);
        assert_eq!(second.enforce_disk_budget(), 6);
        assert_eq!(second.disk_files().unwrap().len(), 4);

        // writes keep the directory bounded, including files this process never read
        for i in 10..15 {
            let key = format!("https://a.example/{}", i);
            second.set(&key, &response(&key, "fresh"));
        }
        assert!(second.disk_files().unwrap().len() <= 4);
        assert!(second.get("https://a.example/14").is_some());
    }

    #[test]
    fn test_disk_budget_counts_bytes() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let mut config = cache_config(&dir);
        config.max_size_mb = 1;

        let cache = CacheManager::new(config.clone(), clock);
        let body = "x".repeat(300 * 1024);
        for i in 0..6 {
            let key = format!("https://a.example/{}", i);
            cache.set(&key, &response(&key, &body));
        }

        let on_disk: u64 = cache
            .disk_files()
            .unwrap()
            .iter()
            .map(|path| std::fs::metadata(path).unwrap().len())
            .sum();
        assert!(on_disk <= config.max_size_bytes());
    }

    #[test]
    fn test_unreadable_disk_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let config = cache_config(&dir);
        let cache = CacheManager::new(config.clone(), Arc::new(ManualClock::new()));

        std::fs::create_dir_all(&config.directory).unwrap();
        std::fs::write(cache.disk_path("k"), "not json").unwrap();
        assert!(cache.get("k").is_none());
    }
}
