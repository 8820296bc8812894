// src/resilience/mod.rs
pub mod breaker;
pub mod health;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use health::{HealthChecker, HealthStatus};
pub use retry::{retry, RetryConfig};
