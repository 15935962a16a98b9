use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct CachedResponse {
    value: Value,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Bounded in-memory cache for AI responses, keyed by a content hash.
///
/// Cloning shares the same storage, so one instance can be handed to every
/// service that needs it.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<String, CachedResponse>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    max_entries: usize,
    ttl_minutes: i64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl_minutes: i64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            max_entries,
            ttl_minutes,
        }
    }

    /// SHA-256 over the operation name and its inputs, hex encoded.
    pub fn key_for(operation: &str, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        for part in parts {
            // Separator keeps ("ab", "c") and ("a", "bc") apart.
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Hex SHA-256 of raw bytes, for inputs such as uploaded images.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        match entries.get(key) {
            Some(cached) if cached.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = %key, "AI response cache hit");
                return Some(cached.value.clone());
            }
            Some(_) => {
                entries.remove(key);
                debug!(cache_key = %key, "AI response cache entry expired");
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn insert(&self, key: String, value: Value) {
        if self.max_entries == 0 {
            return;
        }

        let now = Utc::now();
        let mut entries = self.entries.write().await;
        Self::remove_expired(&mut entries, now);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            Self::evict_oldest(&mut entries);
        }

        entries.insert(
            key,
            CachedResponse {
                value,
                stored_at: now,
                expires_at: now + Duration::minutes(self.ttl_minutes),
            },
        );
        debug!(cache_size = entries.len(), "AI response cached");
    }

    pub async fn get_stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let now = Utc::now();
        let expired_entries = entries.values().filter(|c| c.expires_at <= now).count();

        CacheStats {
            total_entries: entries.len(),
            expired_entries,
            active_entries: entries.len() - expired_entries,
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        info!("AI response cache cleared");
    }

    fn remove_expired(entries: &mut HashMap<String, CachedResponse>, now: DateTime<Utc>) {
        entries.retain(|_, cached| cached.expires_at > now);
    }

    fn evict_oldest(entries: &mut HashMap<String, CachedResponse>) {
        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, cached)| cached.stored_at)
            .map(|(key, _)| key.clone())
        {
            entries.remove(&oldest);
            debug!(cache_key = %oldest, "Evicted oldest AI response");
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}
