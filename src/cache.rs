// src/cache.rs
//! Bounded in-process caches: an LRU+TTL cache for embeddings and an
//! oldest-eviction cache for query responses. Neither is a source of truth;
//! losing either costs latency, never correctness.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::QueryResponse;

/// Size/TTL snapshot for observability endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
}

fn hash_key(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// ---- Embedding cache ----

/// Thread-safe LRU cache for embedding vectors, keyed by a hash of the
/// normalized text. Expired entries are purged lazily on read.
#[derive(Debug)]
pub struct EmbeddingCache {
    inner: Mutex<EmbedInner>,
    capacity: usize,
    ttl: Duration,
}

#[derive(Debug)]
struct EmbedInner {
    map: HashMap<String, (Vec<f32>, Instant)>,
    /// Access order, least-recently-used at the front.
    order: VecDeque<String>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(EmbedInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn key(text: &str) -> String {
        hash_key(text.trim())
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        let mut inner = self.inner.lock().expect("embedding cache mutex poisoned");

        let expired = match inner.map.get(&key) {
            Some((_, inserted)) => inserted.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
            return None;
        }

        // Bump to most-recently-used.
        inner.order.retain(|k| k != &key);
        inner.order.push_back(key.clone());
        inner.map.get(&key).map(|(v, _)| v.clone())
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        let key = Self::key(text);
        let mut inner = self.inner.lock().expect("embedding cache mutex poisoned");

        if !inner.map.contains_key(&key) {
            while inner.map.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(lru) => {
                        inner.map.remove(&lru);
                    }
                    None => break,
                }
            }
        } else {
            inner.order.retain(|k| k != &key);
        }

        inner.map.insert(key.clone(), (embedding, Instant::now()));
        inner.order.push_back(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("embedding cache mutex poisoned");
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("embedding cache mutex poisoned");
        CacheStats {
            size: inner.map.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

// ---- Query cache ----

/// Cache for full query responses. Shorter TTL than the embedding cache
/// since news freshness matters; eviction is oldest-insertion, which is
/// acceptable for entries this short-lived.
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<HashMap<String, (QueryResponse, Instant)>>,
    capacity: usize,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Composite key over the normalized query text and result-shaping flags.
    fn key(query: &str, limit: usize, include_sector: bool) -> String {
        hash_key(&format!(
            "{}|{}|{}",
            query.trim().to_lowercase(),
            limit,
            include_sector
        ))
    }

    pub fn get(&self, query: &str, limit: usize, include_sector: bool) -> Option<QueryResponse> {
        let key = Self::key(query, limit, include_sector);
        let mut inner = self.inner.lock().expect("query cache mutex poisoned");

        match inner.get(&key) {
            Some((resp, inserted)) if inserted.elapsed() < self.ttl => Some(resp.clone()),
            Some(_) => {
                inner.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, query: &str, limit: usize, include_sector: bool, response: QueryResponse) {
        let key = Self::key(query, limit, include_sector);
        let mut inner = self.inner.lock().expect("query cache mutex poisoned");

        if inner.len() >= self.capacity && !inner.contains_key(&key) {
            if let Some(oldest) = inner
                .iter()
                .min_by_key(|(_, (_, t))| *t)
                .map(|(k, _)| k.clone())
            {
                inner.remove(&oldest);
            }
        }

        inner.insert(key, (response, Instant::now()));
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("query cache mutex poisoned")
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("query cache mutex poisoned");
        CacheStats {
            size: inner.len(),
            capacity: self.capacity,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Intent, QueryAnalysis};

    fn long_ttl() -> Duration {
        Duration::from_secs(3600)
    }

    fn response(query: &str) -> QueryResponse {
        QueryResponse {
            query: query.to_string(),
            analysis: QueryAnalysis {
                original_query: query.to_string(),
                entities: vec![],
                sectors: vec![],
                intent: Intent::GeneralSearch,
                expanded_query: query.to_string(),
            },
            results: vec![],
            total_count: 0,
            execution_time_ms: 1.0,
            synthesized_answer: None,
            synthesis_meta: None,
        }
    }

    #[test]
    fn embedding_roundtrip_and_miss() {
        let cache = EmbeddingCache::new(10, long_ttl());
        assert!(cache.get("hello").is_none());
        cache.set("hello", vec![0.1, 0.2]);
        assert_eq!(cache.get("hello"), Some(vec![0.1, 0.2]));
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn embedding_ttl_expiry_is_a_miss() {
        let cache = EmbeddingCache::new(10, Duration::from_millis(30));
        cache.set("soon stale", vec![1.0]);
        assert!(cache.get("soon stale").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("soon stale").is_none());
        assert_eq!(cache.stats().size, 0, "expired entry purged lazily");
    }

    #[test]
    fn embedding_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(2, long_ttl());
        cache.set("a", vec![1.0]);
        cache.set("b", vec![2.0]);
        // Touch "a" so "b" becomes the LRU entry.
        assert!(cache.get("a").is_some());
        cache.set("c", vec![3.0]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none(), "lru entry evicted");
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn query_cache_key_includes_flags() {
        let cache = QueryCache::new(10, long_ttl());
        cache.set("HDFC Bank news", 10, true, response("HDFC Bank news"));
        assert!(cache.get("hdfc bank news", 10, true).is_some(), "key is case-normalized");
        assert!(cache.get("HDFC Bank news", 5, true).is_none(), "limit is part of the key");
        assert!(cache.get("HDFC Bank news", 10, false).is_none(), "sector flag is part of the key");
    }

    #[test]
    fn query_cache_evicts_globally_oldest() {
        let cache = QueryCache::new(2, long_ttl());
        cache.set("q1", 10, true, response("q1"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("q2", 10, true, response("q2"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("q3", 10, true, response("q3"));
        assert!(cache.get("q1", 10, true).is_none(), "oldest entry evicted");
        assert!(cache.get("q2", 10, true).is_some());
        assert!(cache.get("q3", 10, true).is_some());
    }

    #[test]
    fn clear_and_stats() {
        let cache = QueryCache::new(5, Duration::from_secs(300));
        cache.set("q", 10, true, response("q"));
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 5);
        assert_eq!(stats.ttl_secs, 300);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
