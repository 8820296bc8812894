// src/query.rs
//! Natural-language query engine.
//!
//! A query is analyzed against the market knowledge tables (companies,
//! regulators, sectors, themes), retrieved through up to three channels
//! (semantic, entity-filtered, sector-filtered), ranked with channel boosts,
//! and optionally summarized by a synthesis model. Synthesis is best-effort:
//! its failure never fails the search.

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::error::{ServiceError, ServiceResult};
use crate::knowledge;
use crate::resilience::{retry, BreakerConfig, CircuitBreaker, RetryConfig};
use crate::services::{EmbeddingService, MetaFilter, SynthesisClient, VectorIndex};
use crate::types::{
    ArticleHit, Intent, QueryAnalysis, QueryEntity, QueryEntityKind, QueryResponse, QueryResult,
    SearchHit,
};

const MAX_LIMIT: usize = 50;
const MAX_HIGHLIGHTS: usize = 3;
const SYNTHESIS_CONTEXT_DOCS: usize = 5;

const COMPANY_BOOST: f32 = 1.2;
const REGULATOR_BOOST: f32 = 1.1;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub include_sector: bool,
    pub synthesize: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            include_sector: true,
            synthesize: true,
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    synthesis: Option<Arc<dyn SynthesisClient>>,
    cache: Arc<QueryCache>,
    embed_breaker: CircuitBreaker,
    index_breaker: CircuitBreaker,
    retry_cfg: RetryConfig,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        synthesis: Option<Arc<dyn SynthesisClient>>,
        cache: Arc<QueryCache>,
        retry_cfg: RetryConfig,
        breaker_cfg: BreakerConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            synthesis,
            cache,
            embed_breaker: CircuitBreaker::new("query-embedding", breaker_cfg.clone()),
            index_breaker: CircuitBreaker::new("query-index", breaker_cfg),
            retry_cfg,
        }
    }

    /// Run a search end to end. Only validation errors surface to the caller;
    /// a retrieval outage degrades to fewer (or zero) results.
    pub async fn search(&self, req: &SearchRequest) -> ServiceResult<QueryResponse> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(ServiceError::Validation("query must not be empty".into()));
        }
        let limit = req.limit.clamp(1, MAX_LIMIT);
        let started = Instant::now();

        if let Some(mut cached) = self.cache.get(query, limit, req.include_sector) {
            counter!("query_cache_hits_total").increment(1);
            debug!(target: "query", %query, "served from cache");
            cached.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            return Ok(cached);
        }
        counter!("query_cache_misses_total").increment(1);

        let analysis = analyze_query(query);
        info!(
            target: "query",
            %query,
            intent = ?analysis.intent,
            entities = analysis.entities.len(),
            "executing search"
        );

        let mut degraded = false;
        let embedding = match self
            .embed_breaker
            .call(retry("query-embedding", &self.retry_cfg, || {
                self.embedder.embed(query)
            }))
            .await
        {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                counter!("query_retrieval_degraded_total").increment(1);
                warn!(target: "query", error = %e, "embedding failed, returning empty result set");
                degraded = true;
                None
            }
        };

        let mut ranked: Vec<RankedHit> = Vec::new();
        if let Some(embedding) = embedding.as_deref() {
            // Channel 1: unfiltered semantic retrieval on the raw query.
            match self.search_index(embedding, limit * 2, None).await {
                Ok(hits) => merge_channel(&mut ranked, hits, 1.0, "Semantic match"),
                Err(e) => {
                    counter!("query_retrieval_degraded_total").increment(1);
                    warn!(target: "query", error = %e, "semantic channel failed, continuing");
                    degraded = true;
                }
            }

            // Channel 2: per-entity filtered retrieval with channel boosts.
            for entity in &analysis.entities {
                let (filter, boost, reason) = match entity.kind {
                    QueryEntityKind::Company => (
                        MetaFilter::Company(entity.value.clone()),
                        COMPANY_BOOST,
                        format!("Mentions {}", entity.value),
                    ),
                    QueryEntityKind::Regulator => (
                        MetaFilter::Regulator(entity.value.clone()),
                        REGULATOR_BOOST,
                        format!("{} action", entity.value),
                    ),
                };
                match self.search_index(embedding, limit, Some(&filter)).await {
                    Ok(hits) => merge_channel(&mut ranked, hits, boost, &reason),
                    Err(e) => {
                        warn!(target: "query", error = %e, "entity channel failed, continuing");
                        degraded = true;
                    }
                }
            }

            // Channel 3: sector-filtered retrieval, opt-out per request.
            if req.include_sector {
                for sector in &analysis.sectors {
                    let filter = MetaFilter::Sector(sector.clone());
                    match self.search_index(embedding, limit, Some(&filter)).await {
                        Ok(hits) => merge_channel(
                            &mut ranked,
                            hits,
                            1.0,
                            &format!("{sector} sector update"),
                        ),
                        Err(e) => {
                            warn!(target: "query", error = %e, "sector channel failed, continuing");
                            degraded = true;
                        }
                    }
                }
            }
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.hit.id.cmp(&b.hit.id))
        });
        ranked.truncate(limit);

        let results: Vec<QueryResult> = ranked
            .into_iter()
            .map(|r| QueryResult {
                highlights: extract_highlights(&r.hit.document, &analysis),
                article: ArticleHit {
                    id: r.hit.id,
                    title: r.hit.meta.title,
                    content: r.hit.document,
                    source: r.hit.meta.source,
                },
                relevance_score: r.score,
                match_reason: r.reason,
            })
            .collect();

        let mut response = QueryResponse {
            query: query.to_string(),
            total_count: results.len(),
            analysis,
            results,
            execution_time_ms: 0.0,
            synthesized_answer: None,
            synthesis_meta: None,
        };

        if req.synthesize && !response.results.is_empty() {
            self.try_synthesize(query, &mut response).await;
        }

        response.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        // An outage verdict is not worth pinning for the cache TTL; the next
        // call re-probes the retrieval path instead.
        if !degraded {
            self.cache
                .set(query, limit, req.include_sector, response.clone());
        }
        Ok(response)
    }

    /// Title-only shortcut for callers that just need headlines.
    pub async fn quick_search(&self, query: &str, limit: usize) -> ServiceResult<Vec<String>> {
        let req = SearchRequest {
            query: query.to_string(),
            limit,
            include_sector: false,
            synthesize: false,
        };
        let response = self.search(&req).await?;
        Ok(response
            .results
            .into_iter()
            .map(|r| r.article.title)
            .collect())
    }

    /// Best-effort answer synthesis over the top-ranked documents. Absence of
    /// a configured client and any client failure both leave the answer None.
    async fn try_synthesize(&self, query: &str, response: &mut QueryResponse) {
        let Some(client) = &self.synthesis else {
            return;
        };
        let contexts: Vec<String> = response
            .results
            .iter()
            .take(SYNTHESIS_CONTEXT_DOCS)
            .map(|r| format!("[{}] {}", r.article.source, r.article.content))
            .collect();
        match client.synthesize(query, &contexts).await {
            Ok((answer, meta)) => {
                response.synthesized_answer = Some(answer);
                response.synthesis_meta = Some(meta);
            }
            Err(e) => {
                counter!("query_synthesis_failures_total").increment(1);
                warn!(target: "query", error = %e, "synthesis failed, returning results without answer");
            }
        }
    }

    async fn search_index(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> ServiceResult<Vec<SearchHit>> {
        self.index_breaker
            .call(retry("query-index", &self.retry_cfg, || {
                self.index.search(embedding, k, filter)
            }))
            .await
    }
}

struct RankedHit {
    hit: SearchHit,
    score: f32,
    reason: String,
}

/// Fold a channel's hits into the ranked set, keeping the best boosted score
/// per document. Scores are clamped to 1.0 so boosts reorder, never inflate.
fn merge_channel(ranked: &mut Vec<RankedHit>, hits: Vec<SearchHit>, boost: f32, reason: &str) {
    for hit in hits {
        let score = (hit.similarity() * boost).clamp(0.0, 1.0);
        match ranked.iter_mut().find(|r| r.hit.id == hit.id) {
            Some(existing) => {
                if score > existing.score {
                    existing.score = score;
                    existing.reason = reason.to_string();
                }
            }
            None => ranked.push(RankedHit {
                hit,
                score,
                reason: reason.to_string(),
            }),
        }
    }
}

/// Classify the query against the knowledge tables.
pub fn analyze_query(query: &str) -> QueryAnalysis {
    let lower = query.to_lowercase();
    let mut entities: Vec<QueryEntity> = Vec::new();
    let mut sectors: Vec<String> = Vec::new();

    let mut seen_tickers: Vec<String> = Vec::new();
    for name in knowledge::company_names_longest_first() {
        if lower.contains(&name.to_lowercase()) {
            if let Some((canonical, info)) = knowledge::company(name) {
                if seen_tickers.contains(&info.ticker_nse) {
                    continue;
                }
                seen_tickers.push(info.ticker_nse.clone());
                // A company mention puts its sector in play for retrieval.
                if !sectors.contains(&info.sector) {
                    sectors.push(info.sector.clone());
                }
                entities.push(QueryEntity {
                    kind: QueryEntityKind::Company,
                    value: canonical.to_string(),
                    expanded: vec![info.ticker_nse.clone(), info.sector.clone()],
                });
            }
        }
    }

    let mut seen_regulators: Vec<&str> = Vec::new();
    for alias in knowledge::regulator_names_longest_first() {
        if lower.contains(alias) {
            if let Some(canonical) = knowledge::canonical_regulator(alias) {
                if seen_regulators.contains(&canonical) {
                    continue;
                }
                seen_regulators.push(canonical);
                entities.push(QueryEntity {
                    kind: QueryEntityKind::Regulator,
                    value: canonical.to_string(),
                    expanded: knowledge::regulator_sectors(canonical)
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                });
            }
        }
    }

    for (sector, keywords) in knowledge::SECTOR_KEYWORDS.iter() {
        if keywords.iter().any(|kw| lower.contains(kw)) && !sectors.iter().any(|s| s == sector) {
            sectors.push(sector.to_string());
        }
    }
    sectors.sort();

    let has_company = entities
        .iter()
        .any(|e| e.kind == QueryEntityKind::Company);
    let has_regulator = entities
        .iter()
        .any(|e| e.kind == QueryEntityKind::Regulator);
    let has_theme = knowledge::THEME_KEYWORDS.iter().any(|t| lower.contains(t));
    let sector_cue = !sectors.is_empty() || lower.contains("sector");

    let intent = if has_regulator {
        Intent::RegulatorAction
    } else if has_company && sector_cue {
        Intent::CompanyWithSector
    } else if has_company {
        Intent::CompanyNews
    } else if sector_cue {
        Intent::SectorUpdate
    } else if has_theme {
        Intent::ThemeSearch
    } else {
        Intent::GeneralSearch
    };

    let mut terms: Vec<String> = vec![query.trim().to_string()];
    for entity in &entities {
        for term in &entity.expanded {
            if !terms.contains(term) {
                terms.push(term.clone());
            }
        }
    }
    for sector in &sectors {
        if !terms.contains(sector) {
            terms.push(sector.clone());
        }
    }

    QueryAnalysis {
        original_query: query.to_string(),
        entities,
        sectors,
        intent,
        expanded_query: terms.join(" "),
    }
}

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s*").expect("valid sentence regex"));

/// Up to three sentences from `document` that mention a recognized entity.
fn extract_highlights(document: &str, analysis: &QueryAnalysis) -> Vec<String> {
    if analysis.entities.is_empty() {
        return Vec::new();
    }
    let needles: Vec<String> = analysis
        .entities
        .iter()
        .map(|e| e.value.to_lowercase())
        .collect();
    SENTENCE_SPLIT
        .split(document)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| {
            let lower = s.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
        .take(MAX_HIGHLIGHTS)
        .map(|s| format!("{s}."))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regulator_outranks_company_for_intent() {
        let analysis = analyze_query("What did RBI say about HDFC Bank?");
        assert_eq!(analysis.intent, Intent::RegulatorAction);
        assert!(analysis
            .entities
            .iter()
            .any(|e| e.kind == QueryEntityKind::Regulator && e.value == "RBI"));
        assert!(analysis
            .entities
            .iter()
            .any(|e| e.kind == QueryEntityKind::Company && e.value == "HDFC Bank"));
    }

    #[test]
    fn company_with_sector_keywords() {
        let analysis = analyze_query("Infosys cloud software outlook");
        assert_eq!(analysis.intent, Intent::CompanyWithSector);
        assert!(analysis.sectors.contains(&"IT".to_string()));
    }

    #[test]
    fn company_query_carries_its_sector() {
        let analysis = analyze_query("latest on Tata Motors");
        assert_eq!(analysis.intent, Intent::CompanyWithSector);
        assert_eq!(analysis.entities[0].value, "Tata Motors");
        // The sector comes from the company itself, not a keyword in the text.
        assert_eq!(analysis.sectors, vec!["Auto"]);
        assert!(analysis.expanded_query.contains("TATAMOTORS"));
        assert!(analysis.expanded_query.contains("Auto"));
    }

    #[test]
    fn sector_only_query() {
        let analysis = analyze_query("pharma industry outlook");
        assert_eq!(analysis.intent, Intent::SectorUpdate);
        assert_eq!(analysis.sectors, vec!["Pharma"]);
    }

    #[test]
    fn literal_sector_word_is_a_sector_cue() {
        let analysis = analyze_query("sector rotation strategies");
        assert_eq!(analysis.intent, Intent::SectorUpdate);
        assert!(analysis.sectors.is_empty(), "no concrete sector detected");
    }

    #[test]
    fn theme_query_without_entities() {
        let analysis = analyze_query("upcoming ipo listings this month");
        assert_eq!(analysis.intent, Intent::ThemeSearch);
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn fallback_is_general_search() {
        let analysis = analyze_query("what happened in markets today");
        assert_eq!(analysis.intent, Intent::GeneralSearch);
        assert_eq!(analysis.expanded_query, "what happened in markets today");
    }

    #[test]
    fn company_aliases_collapse_in_analysis() {
        let analysis = analyze_query("SBI and State Bank of India results");
        let companies: Vec<&QueryEntity> = analysis
            .entities
            .iter()
            .filter(|e| e.kind == QueryEntityKind::Company)
            .collect();
        assert_eq!(companies.len(), 1);
    }

    #[test]
    fn highlights_pick_entity_sentences() {
        let analysis = analyze_query("HDFC Bank results");
        let doc = "Markets opened flat. HDFC Bank reported strong earnings. \
                   Analysts were surprised. HDFC Bank stock rose 3%. \
                   Other banks followed. HDFC Bank remains a top pick. \
                   HDFC Bank outlook stays positive.";
        let highlights = extract_highlights(doc, &analysis);
        assert_eq!(highlights.len(), 3, "capped at three");
        assert!(highlights.iter().all(|h| h.contains("HDFC Bank")));
    }

    #[test]
    fn no_entities_means_no_highlights() {
        let analysis = analyze_query("general market news");
        assert!(extract_highlights("Some sentence. Another one.", &analysis).is_empty());
    }

    #[test]
    fn channel_merge_keeps_best_score_and_clamps() {
        use crate::types::DocMeta;
        let hit = |id: &str, distance: f32| SearchHit {
            id: id.into(),
            distance,
            meta: DocMeta::default(),
            document: String::new(),
        };

        let mut ranked = Vec::new();
        merge_channel(&mut ranked, vec![hit("a", 0.2)], 1.0, "Semantic match");
        // Boosted channel reports the same doc; 0.8 * 1.2 = 0.96 wins.
        merge_channel(&mut ranked, vec![hit("a", 0.2)], 1.2, "Mentions HDFC Bank");
        merge_channel(&mut ranked, vec![hit("b", 0.05)], 1.2, "Mentions HDFC Bank");

        assert_eq!(ranked.len(), 2);
        let a = ranked.iter().find(|r| r.hit.id == "a").unwrap();
        assert!((a.score - 0.96).abs() < 1e-5);
        assert_eq!(a.reason, "Mentions HDFC Bank");
        let b = ranked.iter().find(|r| r.hit.id == "b").unwrap();
        assert_eq!(b.score, 1.0, "clamped to 1.0");
    }
}
