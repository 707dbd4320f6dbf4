use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tradescope_common::ExtractionResult;
use tracing::debug;

/// Cache key for a normalized URL: hex-encoded sha256.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key-value store for completed extraction results. The pipeline consults
/// it before re-running for a repeated URL; any backend that honors a TTL
/// can implement it.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<ExtractionResult>;
    async fn set(&self, key: &str, value: ExtractionResult);
}

/// In-memory TTL store. Expired entries are dropped on read.
pub struct MemoryStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

struct StoredEntry {
    inserted_at: Instant,
    value: ExtractionResult,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<ExtractionResult> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!(key, "Result cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: ExtractionResult) {
        self.entries.lock().await.insert(
            key.to_string(),
            StoredEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradescope_common::{ExtractionStatus, QualityMetrics};

    fn result(url: &str) -> ExtractionResult {
        ExtractionResult {
            source_url: url.to_string(),
            raw_content: String::new(),
            entities: Vec::new(),
            confidence: 0.5,
            processing_time_ms: 1,
            status: ExtractionStatus::Completed,
            error: None,
            metrics: QualityMetrics::default(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn keys_are_stable_and_distinct() {
        assert_eq!(cache_key("https://a.com/"), cache_key("https://a.com/"));
        assert_ne!(cache_key("https://a.com/"), cache_key("https://b.com/"));
    }

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let key = cache_key("https://a.com/");

        assert!(store.get(&key).await.is_none());
        store.set(&key, result("https://a.com/")).await;

        let hit = store.get(&key).await.expect("cached result");
        assert_eq!(hit.source_url, "https://a.com/");
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let store = MemoryStore::new(Duration::from_millis(1));
        let key = cache_key("https://a.com/");
        store.set(&key, result("https://a.com/")).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get(&key).await.is_none());
    }
}
