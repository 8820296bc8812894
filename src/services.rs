// src/services.rs
//! External service seams and their test doubles.
//!
//! Every dependency the pipeline talks to sits behind an async trait so the
//! engines can be wired with real clients in production and deterministic
//! doubles in tests. Construction is explicit; nothing here is a global.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ServiceError, ServiceResult};
use crate::knowledge;
use crate::types::{
    Article, DocMeta, EntityExtraction, ExtractedEntity, SearchHit, Sentiment, SentimentLabel,
    SynthesisMeta,
};

/// Cosine similarity of two vectors; zero when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

// ---- Trait seams ----

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Metadata predicate pushed down into the vector index.
#[derive(Debug, Clone)]
pub enum MetaFilter {
    Sector(String),
    Company(String),
    Regulator(String),
    Source(String),
}

impl MetaFilter {
    pub fn matches(&self, meta: &DocMeta) -> bool {
        match self {
            Self::Sector(s) => meta.sector.as_deref() == Some(s.as_str()),
            Self::Company(c) => meta.companies.iter().any(|m| m == c),
            Self::Regulator(r) => meta.regulators.iter().any(|m| m == r),
            Self::Source(s) => meta.source == *s,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        meta: DocMeta,
        document: String,
    ) -> ServiceResult<()>;

    /// Nearest neighbors by cosine distance, optionally filtered on metadata.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> ServiceResult<Vec<SearchHit>>;

    async fn count(&self) -> ServiceResult<usize>;
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> ServiceResult<EntityExtraction>;
}

#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn classify(&self, text: &str) -> ServiceResult<Sentiment>;
}

#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        contexts: &[String],
    ) -> ServiceResult<(String, SynthesisMeta)>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn save(&self, article: &Article) -> ServiceResult<()>;
    async fn get(&self, id: &str) -> ServiceResult<Option<Article>>;
    async fn count(&self) -> ServiceResult<usize>;
}

// ---- Embedding doubles ----

const MOCK_EMBED_DIM: usize = 64;

/// Deterministic embedder for tests and local runs.
///
/// Texts containing a primed substring get the primed vector, so tests can
/// make two paraphrases land near each other or far apart on purpose. Other
/// texts fall back to a hashed bag-of-words projection, L2-normalized.
#[derive(Default)]
pub struct MockEmbedder {
    primed: Mutex<Vec<(String, Vec<f32>)>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any text containing `substring` will embed to `vector` (normalized).
    pub fn prime(&self, substring: impl Into<String>, vector: Vec<f32>) {
        self.primed
            .lock()
            .expect("mock embedder mutex poisoned")
            .push((substring.into(), l2_normalize(pad(vector))));
    }

    fn bag_of_words(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; MOCK_EMBED_DIM];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let mut h: u64 = 1469598103934665603;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            v[(h % MOCK_EMBED_DIM as u64) as usize] += 1.0;
        }
        l2_normalize(v)
    }
}

fn pad(mut v: Vec<f32>) -> Vec<f32> {
    v.resize(MOCK_EMBED_DIM, 0.0);
    v
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let primed = self.primed.lock().expect("mock embedder mutex poisoned");
        for (needle, vector) in primed.iter() {
            if text.contains(needle.as_str()) {
                return Ok(vector.clone());
            }
        }
        Ok(Self::bag_of_words(text))
    }

    fn dimension(&self) -> usize {
        MOCK_EMBED_DIM
    }
}

/// Embedder that always reports a transient outage.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, _text: &str) -> ServiceResult<Vec<f32>> {
        Err(ServiceError::transient("embedding", "service unreachable"))
    }

    fn dimension(&self) -> usize {
        MOCK_EMBED_DIM
    }
}

// ---- Vector index ----

struct IndexedDoc {
    embedding: Vec<f32>,
    meta: DocMeta,
    document: String,
}

/// Exact-scan cosine index backed by a map. Fine for tests and small corpora.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    docs: Mutex<HashMap<String, IndexedDoc>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        meta: DocMeta,
        document: String,
    ) -> ServiceResult<()> {
        self.docs.lock().expect("index mutex poisoned").insert(
            id.to_string(),
            IndexedDoc {
                embedding,
                meta,
                document,
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> ServiceResult<Vec<SearchHit>> {
        let docs = self.docs.lock().expect("index mutex poisoned");
        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|(_, doc)| filter.map(|f| f.matches(&doc.meta)).unwrap_or(true))
            .map(|(id, doc)| SearchHit {
                id: id.clone(),
                distance: 1.0 - cosine_similarity(embedding, &doc.embedding),
                meta: doc.meta.clone(),
                document: doc.document.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> ServiceResult<usize> {
        Ok(self.docs.lock().expect("index mutex poisoned").len())
    }
}

/// Vector index that always reports a transient outage.
pub struct FailingVectorIndex;

#[async_trait]
impl VectorIndex for FailingVectorIndex {
    async fn upsert(&self, _: &str, _: Vec<f32>, _: DocMeta, _: String) -> ServiceResult<()> {
        Err(ServiceError::transient("vector-index", "connection refused"))
    }

    async fn search(
        &self,
        _: &[f32],
        _: usize,
        _: Option<&MetaFilter>,
    ) -> ServiceResult<Vec<SearchHit>> {
        Err(ServiceError::transient("vector-index", "connection refused"))
    }

    async fn count(&self) -> ServiceResult<usize> {
        Err(ServiceError::transient("vector-index", "connection refused"))
    }
}

// ---- Entity extraction ----

/// Does `needle` occur in `haystack` with non-alphanumeric boundaries on both
/// sides? Prevents short tickers from matching inside unrelated words.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();
        let ok_before = at == 0
            || !haystack[..at]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let ok_after = end == haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if ok_before && ok_after {
            return true;
        }
        start = at + 1;
    }
    false
}

const EVENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("rate_change", &["repo rate", "rate hike", "rate cut", "interest rate"]),
    ("merger", &["merger", "acquisition", "acquires", "takeover"]),
    ("ipo", &["ipo", "public offering", "listing"]),
    ("dividend", &["dividend"]),
    ("buyback", &["buyback", "share repurchase"]),
    ("earnings", &["quarterly results", "earnings", "net profit"]),
];

/// Rule-based extractor over the embedded market knowledge tables.
///
/// Matches company names and tickers longest-first, canonicalizes regulator
/// aliases, classifies sectors by keyword, and tags financial events.
#[derive(Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EntityExtractor for KeywordExtractor {
    async fn extract(&self, text: &str) -> ServiceResult<EntityExtraction> {
        let lower = text.to_lowercase();
        let mut out = EntityExtraction::default();

        let mut seen_tickers: Vec<String> = Vec::new();
        for name in knowledge::company_names_longest_first() {
            if contains_word(&lower, &name.to_lowercase()) {
                if let Some((canonical, info)) = knowledge::company(name) {
                    if !seen_tickers.contains(&info.ticker_nse) {
                        seen_tickers.push(info.ticker_nse.clone());
                        out.companies.push(ExtractedEntity::new(canonical, 0.9));
                    }
                }
            }
        }

        let mut seen_regulators: Vec<&str> = Vec::new();
        for alias in knowledge::regulator_names_longest_first() {
            if contains_word(&lower, alias) {
                if let Some(canonical) = knowledge::canonical_regulator(alias) {
                    if !seen_regulators.contains(&canonical) {
                        seen_regulators.push(canonical);
                        out.regulators.push(ExtractedEntity::new(canonical, 0.95));
                    }
                }
            }
        }

        for (sector, keywords) in knowledge::SECTOR_KEYWORDS.iter() {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                out.sectors.push(sector.to_string());
            }
        }
        out.sectors.sort();

        for (event, keywords) in EVENT_KEYWORDS {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                out.events.push(ExtractedEntity::new(*event, 0.8));
            }
        }

        Ok(out)
    }
}

// ---- Sentiment ----

const BULLISH_WORDS: &[&str] = &[
    "surge", "rally", "gain", "profit", "growth", "record", "upgrade", "beat", "strong",
    "expansion", "jump",
];
const BEARISH_WORDS: &[&str] = &[
    "fall", "drop", "loss", "decline", "downgrade", "weak", "miss", "slump", "crash", "default",
    "penalty",
];

/// Word-count sentiment model. Stands in for an external classifier; good
/// enough to exercise the pipeline's sentiment stage deterministically.
#[derive(Default)]
pub struct LexiconSentiment;

impl LexiconSentiment {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SentimentModel for LexiconSentiment {
    async fn classify(&self, text: &str) -> ServiceResult<Sentiment> {
        let lower = text.to_lowercase();
        let bullish = BULLISH_WORDS.iter().filter(|w| lower.contains(**w)).count() as f32;
        let bearish = BEARISH_WORDS.iter().filter(|w| lower.contains(**w)).count() as f32;
        let total = bullish + bearish;

        let (label, confidence) = if total == 0.0 {
            (SentimentLabel::Neutral, 0.5)
        } else if bullish > bearish {
            (SentimentLabel::Bullish, bullish / total)
        } else if bearish > bullish {
            (SentimentLabel::Bearish, bearish / total)
        } else {
            (SentimentLabel::Neutral, 0.5)
        };

        let mut scores = HashMap::new();
        if total > 0.0 {
            scores.insert("bullish".to_string(), bullish / total);
            scores.insert("bearish".to_string(), bearish / total);
        }
        Ok(Sentiment {
            label,
            confidence,
            scores,
        })
    }
}

// ---- Synthesis ----

/// Canned synthesis client: echoes the query and names its sources.
pub struct MockSynthesis;

#[async_trait]
impl SynthesisClient for MockSynthesis {
    async fn synthesize(
        &self,
        query: &str,
        contexts: &[String],
    ) -> ServiceResult<(String, SynthesisMeta)> {
        let answer = format!(
            "Based on {} recent article(s): summary for '{}'.",
            contexts.len(),
            query
        );
        Ok((
            answer,
            SynthesisMeta {
                model: "mock-synth-1".to_string(),
                provider: "mock".to_string(),
                latency_ms: 0.0,
                sources_used: contexts.len(),
            },
        ))
    }
}

/// Synthesis client that always reports a transient outage.
pub struct FailingSynthesis;

#[async_trait]
impl SynthesisClient for FailingSynthesis {
    async fn synthesize(&self, _: &str, _: &[String]) -> ServiceResult<(String, SynthesisMeta)> {
        Err(ServiceError::transient("synthesis", "model timeout"))
    }
}

// ---- Article store ----

#[derive(Default)]
pub struct InMemoryArticleStore {
    articles: Mutex<HashMap<String, Article>>,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for InMemoryArticleStore {
    async fn save(&self, article: &Article) -> ServiceResult<()> {
        self.articles
            .lock()
            .expect("store mutex poisoned")
            .insert(article.id.clone(), article.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> ServiceResult<Option<Article>> {
        Ok(self
            .articles
            .lock()
            .expect("store mutex poisoned")
            .get(id)
            .cloned())
    }

    async fn count(&self) -> ServiceResult<usize> {
        Ok(self.articles.lock().expect("store mutex poisoned").len())
    }
}

/// Store that always reports a transient outage.
pub struct FailingArticleStore;

#[async_trait]
impl ArticleStore for FailingArticleStore {
    async fn save(&self, _: &Article) -> ServiceResult<()> {
        Err(ServiceError::transient("article-store", "connection lost"))
    }

    async fn get(&self, _: &str) -> ServiceResult<Option<Article>> {
        Err(ServiceError::transient("article-store", "connection lost"))
    }

    async fn count(&self) -> ServiceResult<usize> {
        Err(ServiceError::transient("article-store", "connection lost"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_handles_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[tokio::test]
    async fn primed_vectors_override_bag_of_words() {
        let embedder = MockEmbedder::new();
        embedder.prime("RBI hikes repo rate", vec![1.0, 0.0, 0.0]);
        embedder.prime("cricket world cup", vec![0.0, 1.0, 0.0]);

        let a = embedder.embed("RBI hikes repo rate by 25 bps").await.unwrap();
        let b = embedder.embed("Breaking: RBI hikes repo rate today").await.unwrap();
        let c = embedder.embed("India wins cricket world cup final").await.unwrap();

        assert!(cosine_similarity(&a, &b) > 0.99);
        assert!(cosine_similarity(&a, &c) < 0.01);
    }

    #[tokio::test]
    async fn bag_of_words_is_deterministic_and_normalized() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed("HDFC Bank quarterly results").await.unwrap();
        let b = embedder.embed("HDFC Bank quarterly results").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn index_search_ranks_by_similarity_and_filters() {
        let index = InMemoryVectorIndex::new();
        let near = vec![1.0, 0.0, 0.0];
        let mid = vec![0.7, 0.7, 0.0];
        let far = vec![0.0, 0.0, 1.0];

        let meta = |sector: &str| DocMeta {
            title: "t".into(),
            source: "s".into(),
            sector: Some(sector.into()),
            ..DocMeta::default()
        };
        index.upsert("near", near.clone(), meta("Banking"), "d1".into()).await.unwrap();
        index.upsert("mid", mid, meta("IT"), "d2".into()).await.unwrap();
        index.upsert("far", far, meta("Banking"), "d3".into()).await.unwrap();

        let hits = index.search(&near, 2, None).await.unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits[1].id, "mid");

        let banking = MetaFilter::Sector("Banking".into());
        let hits = index.search(&near, 5, Some(&banking)).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[tokio::test]
    async fn extractor_finds_companies_regulators_sectors_events() {
        let extraction = KeywordExtractor::new()
            .extract("RBI hikes repo rate; HDFC Bank and ICICI Bank gain on the news")
            .await
            .unwrap();

        let companies: Vec<&str> = extraction.companies.iter().map(|e| e.value.as_str()).collect();
        assert!(companies.contains(&"HDFC Bank"));
        assert!(companies.contains(&"ICICI Bank"));
        assert_eq!(extraction.regulators[0].value, "RBI");
        assert!(extraction.sectors.contains(&"Banking".to_string()));
        assert!(extraction.events.iter().any(|e| e.value == "rate_change"));
    }

    #[tokio::test]
    async fn extractor_dedupes_company_aliases() {
        let extraction = KeywordExtractor::new()
            .extract("State Bank of India (SBI) reported results")
            .await
            .unwrap();
        assert_eq!(extraction.companies.len(), 1, "SBI aliases collapse to one entity");
    }

    #[test]
    fn word_boundaries_respected() {
        assert!(contains_word("itc posts results", "itc"));
        assert!(!contains_word("the pitch was slow", "itc"));
        assert!(contains_word("buy itc.", "itc"));
    }

    #[tokio::test]
    async fn sentiment_counts_lexicon_hits() {
        let model = LexiconSentiment::new();
        let bullish = model.classify("Shares surge on record profit growth").await.unwrap();
        assert_eq!(bullish.label, SentimentLabel::Bullish);
        assert!(bullish.confidence > 0.9);

        let neutral = model.classify("The board met on Tuesday").await.unwrap();
        assert_eq!(neutral.label, SentimentLabel::Neutral);
        assert_eq!(neutral.confidence, 0.5);
    }
}
