// src/resilience/health.rs
//! Health check registry. Each dependency registers a named async probe;
//! `run_all` executes every probe independently so one hung or failing
//! dependency never hides the status of the others.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

type CheckFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Default, Clone)]
pub struct HealthChecker {
    checks: Vec<(String, CheckFn)>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.checks
            .push((name.into(), Arc::new(move || Box::pin(check()))));
    }

    /// Run every registered probe and report each outcome. A probe error is
    /// an unhealthy status, never a panic or an early return.
    pub async fn run_all(&self) -> Vec<HealthStatus> {
        let mut statuses = Vec::with_capacity(self.checks.len());
        for (name, check) in &self.checks {
            let started = Instant::now();
            let outcome = check().await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let status = match outcome {
                Ok(()) => HealthStatus {
                    name: name.clone(),
                    healthy: true,
                    latency_ms,
                    message: None,
                    checked_at: Utc::now(),
                },
                Err(e) => {
                    warn!(target: "resilience", check = %name, error = %e, "health check failed");
                    HealthStatus {
                        name: name.clone(),
                        healthy: false,
                        latency_ms,
                        message: Some(e.to_string()),
                        checked_at: Utc::now(),
                    }
                }
            };
            statuses.push(status);
        }
        statuses
    }

    /// Overall health is the conjunction of all checks.
    pub async fn is_healthy(&self) -> bool {
        self.run_all().await.iter().all(|s| s.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let checker = HealthChecker::new();
        assert!(checker.is_healthy().await);
        assert!(checker.run_all().await.is_empty());
    }

    #[tokio::test]
    async fn one_failing_check_makes_overall_unhealthy() {
        let mut checker = HealthChecker::new();
        checker.register("store", || async { Ok(()) });
        checker.register("index", || async { anyhow::bail!("connection refused") });
        checker.register("embedder", || async { Ok(()) });

        let statuses = checker.run_all().await;
        assert_eq!(statuses.len(), 3, "failing check does not short-circuit the rest");
        assert!(statuses[0].healthy);
        assert!(!statuses[1].healthy);
        assert_eq!(statuses[1].message.as_deref(), Some("connection refused"));
        assert!(statuses[2].healthy);
        assert!(!checker.is_healthy().await);
    }
}
