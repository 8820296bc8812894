// tests/pipeline_flow.rs
//
// Orchestrator runs: single article end to end, duplicate folding, storage
// degradation, and batch accounting.

use std::sync::Arc;
use std::time::Duration;

use finnews_intel::cache::EmbeddingCache;
use finnews_intel::dedup::DedupEngine;
use finnews_intel::impact::ImpactEngine;
use finnews_intel::pipeline::Orchestrator;
use finnews_intel::resilience::{BreakerConfig, RetryConfig};
use finnews_intel::services::{
    ArticleStore, EmbeddingService, FailingArticleStore, InMemoryArticleStore,
    InMemoryVectorIndex, KeywordExtractor, LexiconSentiment, MockEmbedder,
};
use finnews_intel::types::{RawArticle, SentimentLabel};
use finnews_intel::ServiceError;

fn raw(title: &str, content: &str, source: &str) -> RawArticle {
    RawArticle {
        title: title.into(),
        content: content.into(),
        url: None,
        source: source.into(),
        published_at: None,
    }
}

fn embedder() -> Arc<MockEmbedder> {
    let e = MockEmbedder::new();
    e.prime("repo rate", vec![1.0, 0.0, 0.0]);
    e.prime("world cup", vec![0.0, 0.0, 1.0]);
    Arc::new(e)
}

fn orchestrator(
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn ArticleStore>,
) -> Orchestrator {
    let dedup = Arc::new(DedupEngine::new(
        embedder,
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(EmbeddingCache::new(100, Duration::from_secs(3600))),
        0.70,
        RetryConfig::immediate(2),
        BreakerConfig::default(),
    ));
    Orchestrator::new(
        dedup,
        ImpactEngine::new(),
        Arc::new(KeywordExtractor::new()),
        Arc::new(LexiconSentiment::new()),
        store,
        RetryConfig::immediate(2),
    )
}

#[tokio::test]
async fn unique_article_is_enriched_and_stored() {
    let store = Arc::new(InMemoryArticleStore::new());
    let orch = orchestrator(embedder(), store.clone());

    let report = orch
        .process_article(raw(
            "RBI hikes repo rate",
            "HDFC Bank shares gain as the banking sector digests the move.",
            "wire-a",
        ))
        .await
        .expect("processed");

    assert!(!report.is_duplicate);
    assert!(report.stored);
    assert!(report.errors.is_empty());
    assert!(report.cluster_id.is_some(), "unique article seeds its own cluster");
    assert!(report
        .stock_impacts
        .iter()
        .any(|i| i.symbol == "HDFC Bank" && i.confidence == 1.0));

    let saved = store
        .get(&report.article_id)
        .await
        .expect("store up")
        .expect("persisted");
    assert_eq!(saved.sentiment.expect("sentiment set").label, SentimentLabel::Bullish);
    assert!(!saved.stock_impacts.is_empty());
}

#[tokio::test]
async fn second_wording_folds_into_first_cluster() {
    let store = Arc::new(InMemoryArticleStore::new());
    let orch = orchestrator(embedder(), store.clone());

    let first = orch
        .process_article(raw(
            "RBI hikes repo rate",
            "The central bank moved by 25 bps.",
            "wire-a",
        ))
        .await
        .expect("first");
    let second = orch
        .process_article(raw(
            "Repo rate raised again",
            "A 25 bps repo rate increase was announced.",
            "wire-b",
        ))
        .await
        .expect("second");

    assert!(!first.is_duplicate);
    assert!(second.is_duplicate);
    assert_eq!(second.cluster_id, first.cluster_id);
    assert!(!second.stored, "duplicates are folded, not re-stored");

    let cluster = orch
        .dedup()
        .cluster(first.cluster_id.as_deref().expect("cluster id"))
        .expect("cluster exists");
    assert_eq!(cluster.total_articles(), 2);
    assert_eq!(cluster.sources, vec!["wire-a", "wire-b"]);

    assert_eq!(store.count().await.expect("count"), 1);
}

#[tokio::test]
async fn store_outage_degrades_but_does_not_abort() {
    let orch = orchestrator(embedder(), Arc::new(FailingArticleStore));

    let report = orch
        .process_article(raw(
            "RBI hikes repo rate",
            "Banking stocks react to the decision.",
            "wire-a",
        ))
        .await
        .expect("pipeline survives store outage");

    assert!(!report.stored);
    assert!(report.errors.iter().any(|e| e.starts_with("article-store")));
    // Analysis still completed.
    assert!(!report.stock_impacts.is_empty());
}

#[tokio::test]
async fn empty_article_is_rejected() {
    let orch = orchestrator(embedder(), Arc::new(InMemoryArticleStore::new()));
    let err = orch
        .process_article(raw("", "   ", "wire-a"))
        .await
        .expect_err("empty input");
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn batch_report_accounts_for_every_article() {
    let store = Arc::new(InMemoryArticleStore::new());
    let orch = orchestrator(embedder(), store.clone());

    let report = orch
        .process_batch(vec![
            raw("RBI hikes repo rate", "25 bps increase.", "wire-a"),
            raw("Repo rate up", "The repo rate rise surprised nobody.", "wire-b"),
            raw("India wins world cup", "Celebrations everywhere.", "wire-c"),
            raw("", "", "wire-d"),
        ])
        .await;

    assert_eq!(report.total, 4);
    assert_eq!(report.processed, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.errors, 1);
    assert!((report.success_rate - 0.75).abs() < 1e-6);

    // Two distinct stories persisted; the duplicate folded into a cluster.
    assert_eq!(store.count().await.expect("count"), 2);
}

#[tokio::test]
async fn empty_batch_is_a_clean_noop() {
    let orch = orchestrator(embedder(), Arc::new(InMemoryArticleStore::new()));
    let report = orch.process_batch(vec![]).await;
    assert_eq!(report.total, 0);
    assert_eq!(report.success_rate, 1.0);
}
