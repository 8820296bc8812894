// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod clients;
pub mod config;
pub mod dedup;
pub mod error;
pub mod impact;
pub mod knowledge;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod resilience;
pub mod services;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::api::{build_state, create_router, AppState, Dependencies};
pub use crate::error::{ServiceError, ServiceResult};
pub use crate::pipeline::Orchestrator;
pub use crate::query::{QueryEngine, SearchRequest};
