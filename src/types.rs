// src/types.rs
//! Core data model for the news pipeline and the query path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw article as delivered by an ingestion source. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl RawArticle {
    /// Title and body joined the way the dedup/storage path embeds them.
    pub fn combined_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }
}

/// Fully annotated article after pipeline processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub is_duplicate: bool,
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Sources merged in from cluster members during consolidation.
    #[serde(default)]
    pub duplicate_sources: Vec<String>,
    #[serde(default)]
    pub entities: Option<EntityExtraction>,
    #[serde(default)]
    pub stock_impacts: Vec<StockImpact>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    pub stored: bool,
}

/// Group of articles judged to report the same underlying event.
///
/// Every duplicate member was within the configured similarity threshold of
/// the primary at insertion time. Clusters are append-only and never merged.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: String,
    pub primary: Article,
    pub duplicates: Vec<Article>,
    pub sources: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Cluster {
    pub fn total_articles(&self) -> usize {
        1 + self.duplicates.len()
    }
}

/// A single extracted entity with extraction confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub value: String,
    pub confidence: f32,
}

impl ExtractedEntity {
    pub fn new(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }
}

/// Output of the external entity extractor; consumed by the impact engine
/// and the query analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityExtraction {
    #[serde(default)]
    pub companies: Vec<ExtractedEntity>,
    #[serde(default)]
    pub people: Vec<ExtractedEntity>,
    #[serde(default)]
    pub regulators: Vec<ExtractedEntity>,
    #[serde(default)]
    pub sectors: Vec<String>,
    /// Detected financial events, e.g. "rate_change", "dividend", "merger".
    #[serde(default)]
    pub events: Vec<ExtractedEntity>,
}

/// Evidence channel that produced a stock impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Direct,
    Sector,
    Regulatory,
    SupplyChain,
}

/// One stock judged to be affected by a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockImpact {
    pub symbol: String,
    #[serde(default)]
    pub ticker_nse: Option<String>,
    #[serde(default)]
    pub ticker_bse: Option<String>,
    /// Certainty of the attribution, in [0, 1].
    pub confidence: f32,
    pub impact_type: ImpactType,
    pub reasoning: String,
}

impl StockImpact {
    /// Merge key: ticker when known, display symbol otherwise.
    pub fn merge_key(&self) -> &str {
        self.ticker_nse.as_deref().unwrap_or(&self.symbol)
    }
}

/// Result of the impact aggregation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub impacted_stocks: Vec<StockImpact>,
    pub primary_sectors: Vec<String>,
    pub summary: String,
}

/// Sentiment direction as reported by the external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub confidence: f32,
    /// Per-class scores keyed by label name.
    #[serde(default)]
    pub scores: HashMap<String, f32>,
}

// ---- Query path ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryEntityKind {
    Company,
    Regulator,
}

/// Query entity with its context expansion (ticker, sector, governed sectors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEntity {
    pub kind: QueryEntityKind,
    pub value: String,
    pub expanded: Vec<String>,
}

/// Classified query intent, in priority order of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RegulatorAction,
    CompanyWithSector,
    CompanyNews,
    SectorUpdate,
    ThemeSearch,
    GeneralSearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub entities: Vec<QueryEntity>,
    pub sectors: Vec<String>,
    pub intent: Intent,
    /// De-duplicated union of the raw query, expansions, and sectors.
    pub expanded_query: String,
}

/// Minimal article view reconstructed from vector-index payloads for ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleHit {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub article: ArticleHit,
    /// Relevance in [0, 1] after channel boosting and clamping.
    pub relevance_score: f32,
    pub match_reason: String,
    /// Up to three sentences containing a matched entity value.
    pub highlights: Vec<String>,
}

/// Provenance of a synthesized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisMeta {
    pub model: String,
    pub provider: String,
    pub latency_ms: f64,
    pub sources_used: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub analysis: QueryAnalysis,
    pub results: Vec<QueryResult>,
    pub total_count: usize,
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_meta: Option<SynthesisMeta>,
}

// ---- Vector-index payloads ----

/// Typed metadata attached to every vector-index document.
///
/// Fixed schema with optional presence; replaces free-form metadata maps so
/// the index boundary can be validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocMeta {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub regulators: Vec<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// One nearest-neighbor match from the vector index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    /// Cosine distance; similarity is `1.0 - distance`.
    pub distance: f32,
    pub meta: DocMeta,
    pub document: String,
}

impl SearchHit {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

// ---- Pipeline reports ----

/// Outcome of processing one article end to end.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub article_id: String,
    pub is_duplicate: bool,
    pub cluster_id: Option<String>,
    pub stock_impacts: Vec<StockImpact>,
    pub stored: bool,
    pub errors: Vec<String>,
}

/// Aggregate counters for a sequential batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub success_rate: f32,
}
