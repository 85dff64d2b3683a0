//! Score cache and computation lock
//!
//! Targets are normalized and hashed into a short stable key before any
//! storage operation. A store outage never blocks scoring: reads miss and
//! locks are granted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use trust_core::TrustScoreResult;

const ENTRY_PREFIX: &str = "trust:score:";
const LOCK_PREFIX: &str = "trust:lock:";
const HITS_PREFIX: &str = "trust:hits:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Key/value store with expiry, shaped after a Redis client
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Set only if absent (or expired). Returns whether the value was written.
    async fn set_nx_ex(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete only while the key still holds `value`. Returns whether it did.
    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool, CacheError>;

    /// Increment an integer counter, creating it with `ttl` if absent
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;

    /// Number of live keys under a prefix
    async fn count_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

/// Writes between sweeps of expired keys
const DEFAULT_SWEEP_INTERVAL: u64 = 256;

/// In-process store; every operation is atomic per key.
///
/// Expired keys are dropped when read and swept on every
/// `sweep_interval`-th write.
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
    writes: AtomicU64,
    sweep_interval: u64,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, writes: u64) -> Self {
        self.sweep_interval = writes.max(1);
        self
    }

    /// Keys currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        before.saturating_sub(self.entries.len())
    }

    // Must run before any entry guard is taken
    fn note_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!("Swept {} expired cache keys", removed);
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|e| e.1 > now)
            .map(|e| e.0.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.note_write();
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError> {
        self.note_write();
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > now {
                    return Ok(false);
                }
                entry.insert((value, now + ttl));
            }
            Entry::Vacant(entry) => {
                entry.insert((value, now + ttl));
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove_if(key, |_, (current, _)| current == value).is_some())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        self.note_write();
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ("0".to_string(), now + ttl));
        if entry.1 <= now {
            *entry = ("0".to_string(), now + ttl);
        }
        let next = entry
            .0
            .parse::<u64>()
            .map_err(|e| CacheError::Corrupt(format!("{}: {}", key, e)))?
            + 1;
        entry.0 = next.to_string();
        Ok(next)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().1 > now)
            .count())
    }
}

/// Freshness tier of a cached result; decides its TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Registered,
    Unregistered,
    Preview,
    Failed,
}

impl CacheTier {
    pub const ALL: [CacheTier; 4] = [Self::Registered, Self::Unregistered, Self::Preview, Self::Failed];
}

/// Cache TTLs and lock timings, in seconds unless noted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_registered_secs: u64,
    pub ttl_unregistered_secs: u64,
    pub ttl_preview_secs: u64,
    pub ttl_failed_secs: u64,
    pub lock_ttl_secs: u64,
    /// How long a caller that lost the lock waits for the winner's result
    pub lock_wait_ms: u64,
    pub lock_poll_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_registered_secs: 3600,
            ttl_unregistered_secs: 21600,
            ttl_preview_secs: 86400,
            ttl_failed_secs: 300,
            // Outlives the orchestrator's 30s overall budget
            lock_ttl_secs: 45,
            lock_wait_ms: 1500,
            lock_poll_ms: 100,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, tier: CacheTier) -> Duration {
        Duration::from_secs(match tier {
            CacheTier::Registered => self.ttl_registered_secs,
            CacheTier::Unregistered => self.ttl_unregistered_secs,
            CacheTier::Preview => self.ttl_preview_secs,
            CacheTier::Failed => self.ttl_failed_secs,
        })
    }
}

/// Stored form of a cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tier: CacheTier,
    pub cached_at: DateTime<Utc>,
    pub result: TrustScoreResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub active_locks: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Lowercase, strip scheme, `www.` and trailing slashes
pub fn normalize_target(target: &str) -> String {
    let t = target.trim().to_lowercase();
    let t = t
        .strip_prefix("https://")
        .or_else(|| t.strip_prefix("http://"))
        .unwrap_or(&t);
    let t = t.strip_prefix("www.").unwrap_or(t);
    t.trim_end_matches('/').to_string()
}

/// Stable 24-hex-char key for a target
pub fn cache_key(target: &str) -> String {
    let digest = Sha256::digest(normalize_target(target).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..24].to_string()
}

pub struct ScoreCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScoreCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached entry with its tier, or `None` on miss or store failure
    pub async fn get_entry(&self, target: &str) -> Option<CacheEntry> {
        let key = cache_key(target);
        let raw = match self.store.get(&format!("{}{}", ENTRY_PREFIX, key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache read failed for {}, treating as miss: {}", target, e);
                None
            }
        };
        let entry = raw.and_then(|raw| match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Discarding unreadable cache entry for {}: {}", target, e);
                None
            }
        });

        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let ttl = self.config.ttl(entry.tier);
                if let Err(e) = self.store.incr(&format!("{}{}", HITS_PREFIX, key), ttl).await {
                    debug!("Hit counter update failed: {}", e);
                }
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn get(&self, target: &str) -> Option<TrustScoreResult> {
        self.get_entry(target).await.map(|e| e.result)
    }

    /// Store a result under its tier's TTL. Returns false if the store refused.
    pub async fn set(&self, target: &str, result: &TrustScoreResult, tier: CacheTier) -> bool {
        let entry = CacheEntry {
            tier,
            cached_at: Utc::now(),
            result: result.clone(),
        };
        let value = match serde_json::to_string(&entry) {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not serialize result for {}: {}", target, e);
                return false;
            }
        };
        let key = format!("{}{}", ENTRY_PREFIX, cache_key(target));
        match self.store.set_ex(&key, value, self.config.ttl(tier)).await {
            Ok(()) => {
                debug!("Cached {} as {:?}", target, tier);
                true
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", target, e);
                false
            }
        }
    }

    /// Take the computation lock, returning the holder's token.
    /// Granted when the store is unreachable.
    pub async fn acquire_lock(&self, target: &str) -> Option<String> {
        let key = format!("{}{}", LOCK_PREFIX, cache_key(target));
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let token = Uuid::new_v4().to_string();
        match self.store.set_nx_ex(&key, token.clone(), ttl).await {
            Ok(true) => Some(token),
            Ok(false) => None,
            Err(e) => {
                warn!("Lock store unavailable for {}, proceeding unlocked: {}", target, e);
                Some(token)
            }
        }
    }

    /// Release the lock if `token` still holds it. A lock that expired and
    /// was taken by another caller is left alone.
    pub async fn release_lock(&self, target: &str, token: &str) {
        let key = format!("{}{}", LOCK_PREFIX, cache_key(target));
        match self.store.delete_if_eq(&key, token).await {
            Ok(true) => {}
            Ok(false) => warn!("Lock for {} expired before release, now held elsewhere", target),
            Err(e) => warn!("Lock release failed for {}: {}", target, e),
        }
    }

    /// Drop a cached result, e.g. after first-party data changed
    pub async fn invalidate(&self, target: &str) {
        let key = cache_key(target);
        for prefix in [ENTRY_PREFIX, HITS_PREFIX] {
            if let Err(e) = self.store.delete(&format!("{}{}", prefix, key)).await {
                warn!("Cache invalidation failed for {}: {}", target, e);
            }
        }
    }

    /// Times this target's current entry has been served
    pub async fn hit_count(&self, target: &str) -> u64 {
        let key = format!("{}{}", HITS_PREFIX, cache_key(target));
        self.store
            .get(&key)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.count_prefix(ENTRY_PREFIX).await.unwrap_or(0),
            active_locks: self.store.count_prefix(LOCK_PREFIX).await.unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
