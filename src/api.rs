// src/api.rs
//! HTTP surface: article processing, batch ingest, search, health, stats.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::cache::{CacheStats, EmbeddingCache, QueryCache};
use crate::config::Settings;
use crate::dedup::{ClusterStats, DedupEngine};
use crate::error::ServiceError;
use crate::impact::ImpactEngine;
use crate::pipeline::Orchestrator;
use crate::query::{QueryEngine, SearchRequest};
use crate::resilience::{BreakerConfig, HealthChecker, RetryConfig};
use crate::services::{
    ArticleStore, EmbeddingService, EntityExtractor, InMemoryArticleStore, InMemoryVectorIndex,
    KeywordExtractor, LexiconSentiment, MockEmbedder, MockSynthesis, SentimentModel,
    SynthesisClient, VectorIndex,
};
use crate::types::{BatchReport, ProcessReport, QueryResponse, RawArticle};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub query: Arc<QueryEngine>,
    pub health: HealthChecker,
    pub embed_cache: Arc<EmbeddingCache>,
    pub query_cache: Arc<QueryCache>,
}

/// Service dependencies for [`build_state`]. The defaults wire the in-process
/// implementations so the binary runs self-contained; deployments swap in
/// real clients here.
pub struct Dependencies {
    pub embedder: Arc<dyn EmbeddingService>,
    pub index: Arc<dyn VectorIndex>,
    pub extractor: Arc<dyn EntityExtractor>,
    pub sentiment: Arc<dyn SentimentModel>,
    pub synthesis: Option<Arc<dyn SynthesisClient>>,
    pub store: Arc<dyn ArticleStore>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            embedder: Arc::new(MockEmbedder::new()),
            index: Arc::new(InMemoryVectorIndex::new()),
            extractor: Arc::new(KeywordExtractor::new()),
            sentiment: Arc::new(LexiconSentiment::new()),
            synthesis: Some(Arc::new(MockSynthesis)),
            store: Arc::new(InMemoryArticleStore::new()),
        }
    }
}

impl Dependencies {
    /// Prefer the HTTP-backed embedder and synthesis client when an API key
    /// is configured, falling back to the in-process implementations.
    pub fn from_env() -> Self {
        let mut deps = Self::default();
        if let Some(embedder) = crate::clients::HttpEmbedder::from_env() {
            deps.embedder = Arc::new(embedder);
        }
        if let Some(synthesis) = crate::clients::HttpSynthesis::from_env() {
            deps.synthesis = Some(Arc::new(synthesis));
        }
        deps
    }
}

pub fn build_state(settings: &Settings, deps: Dependencies) -> AppState {
    let retry_cfg = RetryConfig {
        max_attempts: settings.retry_max_attempts,
        ..RetryConfig::default()
    };
    let breaker_cfg = BreakerConfig {
        failure_threshold: settings.breaker_failure_threshold,
        recovery_timeout: settings.breaker_recovery,
        ..BreakerConfig::default()
    };

    let embed_cache = Arc::new(EmbeddingCache::new(
        settings.embed_cache_capacity,
        settings.embed_cache_ttl,
    ));
    let query_cache = Arc::new(QueryCache::new(
        settings.query_cache_capacity,
        settings.query_cache_ttl,
    ));

    let dedup = Arc::new(DedupEngine::new(
        deps.embedder.clone(),
        deps.index.clone(),
        embed_cache.clone(),
        settings.dedup_threshold,
        retry_cfg.clone(),
        breaker_cfg.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        dedup,
        ImpactEngine::new(),
        deps.extractor,
        deps.sentiment,
        deps.store.clone(),
        retry_cfg.clone(),
    ));

    let query = Arc::new(QueryEngine::new(
        deps.embedder,
        deps.index.clone(),
        deps.synthesis,
        query_cache.clone(),
        retry_cfg,
        breaker_cfg,
    ));

    let mut health = HealthChecker::new();
    {
        let index = deps.index;
        health.register("vector-index", move || {
            let index = index.clone();
            async move {
                index.count().await.map(|_| ()).map_err(anyhow::Error::from)
            }
        });
    }
    {
        let store = deps.store;
        health.register("article-store", move || {
            let store = store.clone();
            async move {
                store.count().await.map(|_| ()).map_err(anyhow::Error::from)
            }
        });
    }

    AppState {
        orchestrator,
        query,
        health,
        embed_cache,
        query_cache,
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/process", post(process_article))
        .route("/process/batch", post(process_batch))
        .route("/search", post(search))
        .route("/stats", get(stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Transient { .. }
            | ServiceError::CircuitOpen(_)
            | ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn process_article(
    State(state): State<AppState>,
    Json(raw): Json<RawArticle>,
) -> Result<Json<ProcessReport>, ApiError> {
    let report = state.orchestrator.process_article(raw).await?;
    Ok(Json(report))
}

async fn process_batch(
    State(state): State<AppState>,
    Json(articles): Json<Vec<RawArticle>>,
) -> Json<BatchReport> {
    Json(state.orchestrator.process_batch(articles).await)
}

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_true")]
    include_sector: bool,
    #[serde(default = "default_true")]
    synthesize: bool,
}

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    let req = SearchRequest {
        query: body.query,
        limit: body.limit,
        include_sector: body.include_sector,
        synthesize: body.synthesize,
    };
    let response = state.query.search(&req).await?;
    Ok(Json(response))
}

#[derive(serde::Serialize)]
struct HealthResponse {
    healthy: bool,
    checks: Vec<crate::resilience::HealthStatus>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let checks = state.health.run_all().await;
    let healthy = checks.iter().all(|c| c.healthy);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { healthy, checks }))
}

#[derive(serde::Serialize)]
struct StatsResponse {
    clusters: ClusterStats,
    embedding_cache: CacheStats,
    query_cache: CacheStats,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        clusters: state.orchestrator.dedup().cluster_stats(),
        embedding_cache: state.embed_cache.stats(),
        query_cache: state.query_cache.stats(),
    })
}
