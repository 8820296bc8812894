// src/pipeline.rs
//! Pipeline orchestrator.
//!
//! Drives one article through dedup, entity extraction, impact analysis,
//! sentiment, and storage. Stage state lives in an explicit [`ArticleState`]
//! passed between stages; each stage either enriches it or records an error
//! and lets the rest of the pipeline continue. Only invalid input aborts a
//! run.

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dedup::{DedupEngine, DupCheck};
use crate::error::{ServiceError, ServiceResult};
use crate::impact::ImpactEngine;
use crate::resilience::{retry, RetryConfig};
use crate::services::{ArticleStore, EntityExtractor, SentimentModel};
use crate::types::{
    Article, BatchReport, DocMeta, EntityExtraction, ImpactAnalysis, ProcessReport, RawArticle,
    Sentiment,
};

static METRICS_DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register metric descriptions once per process. Safe to call repeatedly.
pub fn ensure_metrics_described() {
    METRICS_DESCRIBED.get_or_init(|| {
        describe_counter!("pipeline_articles_total", "Articles entering the pipeline.");
        describe_counter!("pipeline_duplicates_total", "Articles folded into an existing cluster.");
        describe_counter!("pipeline_stored_total", "Articles fully persisted.");
        describe_counter!("pipeline_stage_errors_total", "Stage failures absorbed by the pipeline.");
        describe_counter!("dedup_checks_total", "Duplicate checks performed.");
        describe_counter!("dedup_duplicates_total", "Checks that found a duplicate.");
        describe_counter!("dedup_fail_open_total", "Checks answered unique due to an outage.");
        describe_counter!("dedup_cluster_additions_total", "Duplicates appended to clusters.");
        describe_counter!("embed_cache_hits_total", "Embedding cache hits.");
        describe_counter!("embed_cache_misses_total", "Embedding cache misses.");
        describe_counter!("query_cache_hits_total", "Query cache hits.");
        describe_counter!("query_cache_misses_total", "Query cache misses.");
        describe_counter!("query_synthesis_failures_total", "Synthesis calls that failed.");
        describe_counter!("query_retrieval_degraded_total", "Searches that lost a retrieval channel to an outage.");
        describe_histogram!("pipeline_process_ms", "Per-article processing time in milliseconds.");
        describe_gauge!("pipeline_last_batch_size", "Size of the most recent batch run.");
        describe_gauge!("dedup_similarity_threshold", "Configured duplicate similarity bar.");
        describe_gauge!("embed_cache_capacity", "Configured embedding cache capacity.");
        describe_gauge!("query_cache_capacity", "Configured query cache capacity.");
    });
}

/// Mutable state threaded through the pipeline stages for one article.
#[derive(Debug)]
pub struct ArticleState {
    pub id: String,
    pub raw: RawArticle,
    pub dup: Option<DupCheck>,
    pub extraction: Option<EntityExtraction>,
    pub impact: Option<ImpactAnalysis>,
    pub sentiment: Option<Sentiment>,
    pub cluster_id: Option<String>,
    pub stored: bool,
    pub errors: Vec<String>,
}

impl ArticleState {
    fn new(raw: RawArticle) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            raw,
            dup: None,
            extraction: None,
            impact: None,
            sentiment: None,
            cluster_id: None,
            stored: false,
            errors: Vec::new(),
        }
    }

    fn record_error(&mut self, stage: &str, err: &ServiceError) {
        counter!("pipeline_stage_errors_total").increment(1);
        warn!(target: "pipeline", article = %self.id, %stage, error = %err, "stage failed");
        self.errors.push(format!("{stage}: {err}"));
    }

    fn is_duplicate(&self) -> bool {
        self.dup.as_ref().map(|d| d.is_duplicate).unwrap_or(false)
    }

    fn into_article(self) -> (Article, ProcessReport) {
        let is_duplicate = self.is_duplicate();
        let article = Article {
            id: self.id.clone(),
            title: self.raw.title,
            content: self.raw.content,
            url: self.raw.url,
            source: self.raw.source,
            published_at: self.raw.published_at,
            ingested_at: Utc::now(),
            is_duplicate,
            cluster_id: self.cluster_id.clone(),
            duplicate_sources: Vec::new(),
            entities: self.extraction,
            stock_impacts: self
                .impact
                .as_ref()
                .map(|i| i.impacted_stocks.clone())
                .unwrap_or_default(),
            sentiment: self.sentiment,
            stored: self.stored,
        };
        let report = ProcessReport {
            article_id: article.id.clone(),
            is_duplicate,
            cluster_id: self.cluster_id,
            stock_impacts: article.stock_impacts.clone(),
            stored: self.stored,
            errors: self.errors,
        };
        (article, report)
    }
}

pub struct Orchestrator {
    dedup: Arc<DedupEngine>,
    impact: ImpactEngine,
    extractor: Arc<dyn EntityExtractor>,
    sentiment: Arc<dyn SentimentModel>,
    store: Arc<dyn ArticleStore>,
    retry_cfg: RetryConfig,
}

impl Orchestrator {
    pub fn new(
        dedup: Arc<DedupEngine>,
        impact: ImpactEngine,
        extractor: Arc<dyn EntityExtractor>,
        sentiment: Arc<dyn SentimentModel>,
        store: Arc<dyn ArticleStore>,
        retry_cfg: RetryConfig,
    ) -> Self {
        ensure_metrics_described();
        Self {
            dedup,
            impact,
            extractor,
            sentiment,
            store,
            retry_cfg,
        }
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    /// Process one raw article through every stage.
    pub async fn process_article(&self, raw: RawArticle) -> ServiceResult<ProcessReport> {
        if raw.title.trim().is_empty() && raw.content.trim().is_empty() {
            return Err(ServiceError::Validation(
                "article has neither title nor content".into(),
            ));
        }
        counter!("pipeline_articles_total").increment(1);
        let started = Instant::now();

        let mut state = ArticleState::new(raw);
        let text = state.raw.combined_text();

        let dup = self.dedup.check_duplicate(&text).await;
        state.cluster_id = dup.cluster_id.clone();
        state.dup = Some(dup);

        if state.is_duplicate() {
            let report = self.fold_duplicate(state);
            histogram!("pipeline_process_ms").record(started.elapsed().as_secs_f64() * 1000.0);
            return Ok(report);
        }

        // Enrichment stages. Failures degrade the article, never drop it.
        match retry("entity-extraction", &self.retry_cfg, || {
            self.extractor.extract(&text)
        })
        .await
        {
            Ok(extraction) => state.extraction = Some(extraction),
            Err(e) => state.record_error("entity-extraction", &e),
        }

        let extraction = state.extraction.clone().unwrap_or_default();
        state.impact = Some(self.impact.analyze(&extraction));

        match retry("sentiment", &self.retry_cfg, || {
            self.sentiment.classify(&text)
        })
        .await
        {
            Ok(sentiment) => state.sentiment = Some(sentiment),
            Err(e) => state.record_error("sentiment", &e),
        }

        self.persist(&mut state, &text, &extraction).await;

        let (article, report) = state.into_article();
        if report.stored {
            counter!("pipeline_stored_total").increment(1);
        }
        histogram!("pipeline_process_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            target: "pipeline",
            article = %article.id,
            impacts = report.stock_impacts.len(),
            stored = report.stored,
            "article processed"
        );
        Ok(report)
    }

    /// Duplicate path: fold into the matched cluster and stop. The duplicate
    /// is never re-indexed or re-analyzed; the cluster primary already covers
    /// the event.
    fn fold_duplicate(&self, mut state: ArticleState) -> ProcessReport {
        counter!("pipeline_duplicates_total").increment(1);
        let similarity = state.dup.as_ref().map(|d| d.similarity).unwrap_or(0.0);
        info!(
            target: "pipeline",
            article = %state.id,
            similarity,
            cluster = state.cluster_id.as_deref().unwrap_or("none"),
            "duplicate folded"
        );

        let cluster_id = state.cluster_id.clone();
        state.stored = false;
        let (article, report) = state.into_article();
        if let Some(cluster_id) = cluster_id {
            self.dedup.add_to_cluster(&cluster_id, article);
        }
        report
    }

    /// Vector index first, then the relational store. `stored` means both
    /// writes landed; a half-write leaves an error in the report and gets
    /// reconciled on the next ingest of the same event.
    async fn persist(&self, state: &mut ArticleState, text: &str, extraction: &EntityExtraction) {
        let cluster_id = self.dedup.create_cluster(self.snapshot_article(state));
        state.cluster_id = Some(cluster_id.clone());

        let meta = DocMeta {
            title: state.raw.title.clone(),
            source: state.raw.source.clone(),
            sector: extraction.sectors.first().cloned(),
            companies: extraction.companies.iter().map(|c| c.value.clone()).collect(),
            regulators: extraction.regulators.iter().map(|r| r.value.clone()).collect(),
            cluster_id: Some(cluster_id),
            published_at: state.raw.published_at,
        };

        let indexed = match self.dedup.index_article(&state.id, text, meta).await {
            Ok(()) => true,
            Err(e) => {
                state.record_error("vector-index", &e);
                false
            }
        };

        let article = self.snapshot_article(state);
        let saved = match retry("article-store", &self.retry_cfg, || self.store.save(&article)).await
        {
            Ok(()) => true,
            Err(e) => {
                state.record_error("article-store", &e);
                false
            }
        };

        state.stored = indexed && saved;
    }

    fn snapshot_article(&self, state: &ArticleState) -> Article {
        Article {
            id: state.id.clone(),
            title: state.raw.title.clone(),
            content: state.raw.content.clone(),
            url: state.raw.url.clone(),
            source: state.raw.source.clone(),
            published_at: state.raw.published_at,
            ingested_at: Utc::now(),
            is_duplicate: false,
            cluster_id: state.cluster_id.clone(),
            duplicate_sources: Vec::new(),
            entities: state.extraction.clone(),
            stock_impacts: state
                .impact
                .as_ref()
                .map(|i| i.impacted_stocks.clone())
                .unwrap_or_default(),
            sentiment: state.sentiment.clone(),
            stored: false,
        }
    }

    /// Sequential batch run. One bad article never stops the batch.
    pub async fn process_batch(&self, articles: Vec<RawArticle>) -> BatchReport {
        let total = articles.len();
        gauge!("pipeline_last_batch_size").set(total as f64);

        let mut processed = 0usize;
        let mut duplicates = 0usize;
        let mut errors = 0usize;

        for raw in articles {
            match self.process_article(raw).await {
                Ok(report) => {
                    processed += 1;
                    if report.is_duplicate {
                        duplicates += 1;
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(target: "pipeline", error = %e, "article rejected");
                }
            }
        }

        let success_rate = if total == 0 {
            1.0
        } else {
            processed as f32 / total as f32
        };
        info!(
            target: "pipeline",
            total, processed, duplicates, errors, success_rate,
            "batch complete"
        );
        BatchReport {
            total,
            processed,
            duplicates,
            errors,
            success_rate,
        }
    }
}
