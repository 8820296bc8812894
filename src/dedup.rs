// src/dedup.rs
//! Semantic deduplication and event clustering.
//!
//! Incoming articles are embedded, matched against the vector index by cosine
//! similarity, and flagged as duplicates of an existing cluster when the best
//! neighbor clears the configured threshold. The duplicate check fails OPEN:
//! if the embedding service or the index is down, the article is treated as
//! unique and continues through the pipeline, because dropping real news on an
//! infrastructure fault is the worse failure mode.

use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::EmbeddingCache;
use crate::error::{ServiceError, ServiceResult};
use crate::resilience::{retry, BreakerConfig, CircuitBreaker, RetryConfig};
use crate::services::{EmbeddingService, VectorIndex};
use crate::types::{Article, Cluster, DocMeta, SearchHit};

/// Outcome of a duplicate check.
#[derive(Debug, Clone)]
pub struct DupCheck {
    pub is_duplicate: bool,
    /// Best neighbor similarity seen, 0.0 when the index is empty.
    pub similarity: f32,
    pub matched_id: Option<String>,
    pub cluster_id: Option<String>,
    /// True when the verdict came from the fail-open path, not a real check.
    pub fail_open: bool,
}

impl DupCheck {
    fn unique() -> Self {
        Self {
            is_duplicate: false,
            similarity: 0.0,
            matched_id: None,
            cluster_id: None,
            fail_open: false,
        }
    }

    fn fail_open() -> Self {
        Self {
            fail_open: true,
            ..Self::unique()
        }
    }
}

/// Per-cluster aggregate counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClusterStats {
    pub total_clusters: usize,
    pub total_articles: usize,
    pub multi_source_clusters: usize,
    pub largest_cluster: usize,
}

const NEIGHBOR_K: usize = 5;

pub struct DedupEngine {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    cache: Arc<EmbeddingCache>,
    embed_breaker: CircuitBreaker,
    index_breaker: CircuitBreaker,
    retry_cfg: RetryConfig,
    threshold: f32,
    clusters: Mutex<HashMap<String, Cluster>>,
}

impl DedupEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        cache: Arc<EmbeddingCache>,
        threshold: f32,
        retry_cfg: RetryConfig,
        breaker_cfg: BreakerConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            cache,
            embed_breaker: CircuitBreaker::new("embedding", breaker_cfg.clone()),
            index_breaker: CircuitBreaker::new("vector-index", breaker_cfg),
            retry_cfg,
            threshold,
            clusters: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embed `text`, consulting the cache first. Misses go to the embedding
    /// service under the breaker, with retries inside a single breaker call so
    /// an exhausted retry sequence counts as one failure.
    pub async fn embed_cached(&self, text: &str) -> ServiceResult<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            counter!("embed_cache_hits_total").increment(1);
            return Ok(hit);
        }
        counter!("embed_cache_misses_total").increment(1);

        let embedding = self
            .embed_breaker
            .call(retry("embedding", &self.retry_cfg, || {
                self.embedder.embed(text)
            }))
            .await?;
        self.cache.set(text, embedding.clone());
        Ok(embedding)
    }

    /// Check whether `text` duplicates an already-indexed article.
    pub async fn check_duplicate(&self, text: &str) -> DupCheck {
        counter!("dedup_checks_total").increment(1);
        match self.try_check(text).await {
            Ok(check) => {
                if check.is_duplicate {
                    counter!("dedup_duplicates_total").increment(1);
                }
                check
            }
            Err(e) => {
                counter!("dedup_fail_open_total").increment(1);
                match &e {
                    ServiceError::CircuitOpen(name) => {
                        debug!(target: "dedup", breaker = %name, "circuit open, passing article through")
                    }
                    other => {
                        warn!(target: "dedup", error = %other, "duplicate check failed, passing article through")
                    }
                }
                DupCheck::fail_open()
            }
        }
    }

    async fn try_check(&self, text: &str) -> ServiceResult<DupCheck> {
        let embedding = self.embed_cached(text).await?;
        let hits = self.search_index(&embedding, NEIGHBOR_K, None).await?;

        let best = hits
            .iter()
            .max_by(|a, b| a.similarity().total_cmp(&b.similarity()));
        let Some(best) = best else {
            return Ok(DupCheck::unique());
        };

        let similarity = best.similarity();
        if similarity >= self.threshold {
            Ok(DupCheck {
                is_duplicate: true,
                similarity,
                matched_id: Some(best.id.clone()),
                cluster_id: best.meta.cluster_id.clone(),
                fail_open: false,
            })
        } else {
            Ok(DupCheck {
                similarity,
                ..DupCheck::unique()
            })
        }
    }

    /// Exploratory lookup: every neighbor above a relaxed bar (70% of the
    /// duplicate threshold), near-duplicates included.
    pub async fn find_similar(&self, text: &str, limit: usize) -> ServiceResult<Vec<SearchHit>> {
        let embedding = self.embed_cached(text).await?;
        let hits = self.search_index(&embedding, limit, None).await?;
        let relaxed = self.threshold * 0.7;
        Ok(hits
            .into_iter()
            .filter(|h| h.similarity() >= relaxed)
            .collect())
    }

    async fn search_index(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&crate::services::MetaFilter>,
    ) -> ServiceResult<Vec<SearchHit>> {
        self.index_breaker
            .call(retry("vector-index", &self.retry_cfg, || {
                self.index.search(embedding, k, filter)
            }))
            .await
    }

    /// Index an article's embedding and metadata for future checks.
    pub async fn index_article(
        &self,
        id: &str,
        text: &str,
        meta: DocMeta,
    ) -> ServiceResult<()> {
        let embedding = self.embed_cached(text).await?;
        self.index_breaker
            .call(retry("vector-index", &self.retry_cfg, || {
                self.index
                    .upsert(id, embedding.clone(), meta.clone(), text.to_string())
            }))
            .await
    }

    // ---- Clusters ----

    /// Start a new cluster with `primary` as its representative article.
    pub fn create_cluster(&self, primary: Article) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let cluster = Cluster {
            id: id.clone(),
            sources: vec![primary.source.clone()],
            primary,
            duplicates: Vec::new(),
            first_seen: now,
            last_updated: now,
        };
        self.clusters
            .lock()
            .expect("cluster mutex poisoned")
            .insert(id.clone(), cluster);
        info!(target: "dedup", cluster = %id, "created cluster");
        id
    }

    /// Append a duplicate to an existing cluster, tracking distinct sources.
    pub fn add_to_cluster(&self, cluster_id: &str, duplicate: Article) -> bool {
        let mut clusters = self.clusters.lock().expect("cluster mutex poisoned");
        let Some(cluster) = clusters.get_mut(cluster_id) else {
            warn!(target: "dedup", cluster = %cluster_id, "add to unknown cluster ignored");
            return false;
        };
        if !cluster.sources.contains(&duplicate.source) {
            cluster.sources.push(duplicate.source.clone());
        }
        cluster.duplicates.push(duplicate);
        cluster.last_updated = Utc::now();
        counter!("dedup_cluster_additions_total").increment(1);
        true
    }

    /// Display view of a cluster: the longest-content member as the
    /// representative, the other sources merged in, and the earliest known
    /// publish time. Read-only; cluster membership is untouched.
    pub fn consolidate_cluster(&self, cluster_id: &str) -> Option<Article> {
        let clusters = self.clusters.lock().expect("cluster mutex poisoned");
        let cluster = clusters.get(cluster_id)?;

        let mut merged = cluster.primary.clone();
        for dup in &cluster.duplicates {
            if dup.content.len() > merged.content.len() {
                merged = dup.clone();
            }
        }
        merged.published_at = std::iter::once(&cluster.primary)
            .chain(cluster.duplicates.iter())
            .filter_map(|a| a.published_at)
            .min();
        merged.cluster_id = Some(cluster.id.clone());
        merged.duplicate_sources = cluster
            .sources
            .iter()
            .filter(|s| **s != merged.source)
            .cloned()
            .collect();
        Some(merged)
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<Cluster> {
        self.clusters
            .lock()
            .expect("cluster mutex poisoned")
            .get(cluster_id)
            .cloned()
    }

    pub fn cluster_stats(&self) -> ClusterStats {
        let clusters = self.clusters.lock().expect("cluster mutex poisoned");
        let mut stats = ClusterStats {
            total_clusters: clusters.len(),
            ..ClusterStats::default()
        };
        for cluster in clusters.values() {
            let size = cluster.total_articles();
            stats.total_articles += size;
            stats.largest_cluster = stats.largest_cluster.max(size);
            if cluster.sources.len() > 1 {
                stats.multi_source_clusters += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FailingEmbedder, InMemoryVectorIndex, MockEmbedder};
    use std::time::Duration;

    fn article(id: &str, source: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("title {id}"),
            content: "content".to_string(),
            url: None,
            source: source.to_string(),
            published_at: None,
            ingested_at: Utc::now(),
            is_duplicate: false,
            cluster_id: None,
            duplicate_sources: vec![],
            entities: None,
            stock_impacts: vec![],
            sentiment: None,
            stored: false,
        }
    }

    fn engine_with(embedder: Arc<dyn EmbeddingService>) -> DedupEngine {
        DedupEngine::new(
            embedder,
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(EmbeddingCache::new(100, Duration::from_secs(3600))),
            0.70,
            RetryConfig::immediate(2),
            BreakerConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_index_is_never_a_duplicate() {
        let engine = engine_with(Arc::new(MockEmbedder::new()));
        let check = engine.check_duplicate("RBI hikes repo rate by 25 bps").await;
        assert!(!check.is_duplicate);
        assert!(!check.fail_open);
        assert_eq!(check.similarity, 0.0);
    }

    #[tokio::test]
    async fn near_identical_text_is_flagged_with_cluster() {
        let embedder = MockEmbedder::new();
        embedder.prime("repo rate", vec![1.0, 0.0, 0.0]);
        let engine = engine_with(Arc::new(embedder));

        let meta = DocMeta {
            title: "RBI hikes repo rate".into(),
            source: "wire-a".into(),
            cluster_id: Some("cluster-1".into()),
            ..DocMeta::default()
        };
        engine
            .index_article("a1", "RBI hikes repo rate by 25 bps", meta)
            .await
            .unwrap();

        let check = engine
            .check_duplicate("Central bank raises repo rate, a 25 bps move")
            .await;
        assert!(check.is_duplicate);
        assert!(check.similarity > 0.99);
        assert_eq!(check.matched_id.as_deref(), Some("a1"));
        assert_eq!(check.cluster_id.as_deref(), Some("cluster-1"));
    }

    #[tokio::test]
    async fn below_threshold_is_unique_but_reports_similarity() {
        let embedder = MockEmbedder::new();
        embedder.prime("repo rate", vec![1.0, 0.0]);
        // similarity to [1,0] is cos = 0.6
        embedder.prime("fuel prices", vec![0.6, 0.8]);
        let engine = engine_with(Arc::new(embedder));

        engine
            .index_article("a1", "RBI repo rate decision", DocMeta::default())
            .await
            .unwrap();
        let check = engine.check_duplicate("fuel prices rise again").await;
        assert!(!check.is_duplicate);
        assert!((check.similarity - 0.6).abs() < 1e-3);
        assert!(check.matched_id.is_none());
    }

    #[tokio::test]
    async fn embedding_outage_fails_open() {
        let engine = engine_with(Arc::new(FailingEmbedder));
        let check = engine.check_duplicate("some article text").await;
        assert!(!check.is_duplicate, "outage must not drop articles");
        assert!(check.fail_open);
    }

    #[tokio::test]
    async fn find_similar_keeps_everything_above_relaxed_bar() {
        let embedder = MockEmbedder::new();
        embedder.prime("query text", vec![1.0, 0.0]);
        // Against the query: sim 1.0, sim 0.6, and sim 0.0.
        embedder.prime("dup doc", vec![1.0, 0.0]);
        embedder.prime("related doc", vec![0.6, 0.8]);
        embedder.prime("cricket doc", vec![0.0, 1.0]);
        let engine = engine_with(Arc::new(embedder));
        // relaxed bar is 0.49; there is no upper cut, near-duplicates stay in
        engine.index_article("dup", "dup doc", DocMeta::default()).await.unwrap();
        engine
            .index_article("rel", "related doc here", DocMeta::default())
            .await
            .unwrap();
        engine
            .index_article("far", "cricket doc coverage", DocMeta::default())
            .await
            .unwrap();

        let hits = engine.find_similar("query text", 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["dup", "rel"], "nearest first, unrelated dropped");
    }

    #[tokio::test]
    async fn cache_serves_repeat_embeddings() {
        let embedder = MockEmbedder::new();
        embedder.prime("cached text", vec![0.0, 1.0]);
        let engine = engine_with(Arc::new(embedder));

        let first = engine.embed_cached("cached text sample").await.unwrap();
        let second = engine.embed_cached("cached text sample").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cluster_lifecycle_tracks_sources() {
        let engine = engine_with(Arc::new(MockEmbedder::new()));
        let id = engine.create_cluster(article("p", "wire-a"));
        assert!(engine.add_to_cluster(&id, article("d1", "wire-b")));
        assert!(engine.add_to_cluster(&id, article("d2", "wire-b")));
        assert!(!engine.add_to_cluster("missing", article("d3", "wire-c")));

        let cluster = engine.cluster(&id).unwrap();
        assert_eq!(cluster.total_articles(), 3);
        assert_eq!(cluster.sources, vec!["wire-a", "wire-b"]);

        let merged = engine.consolidate_cluster(&id).unwrap();
        assert_eq!(merged.id, "p");
        assert_eq!(merged.cluster_id.as_deref(), Some(id.as_str()));
        assert_eq!(merged.duplicate_sources, vec!["wire-b"]);

        let stats = engine.cluster_stats();
        assert_eq!(stats.total_clusters, 1);
        assert_eq!(stats.total_articles, 3);
        assert_eq!(stats.multi_source_clusters, 1);
        assert_eq!(stats.largest_cluster, 3);
    }
}
