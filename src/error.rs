// src/error.rs
//! Error taxonomy for external calls and the resilience layer.
//!
//! Application-level wiring (startup, handlers) stays on `anyhow`; the typed
//! variants below exist so retry and circuit-breaker logic can tell apart
//! transient faults, open circuits, and caller mistakes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network/timeout class failure from an external service. Retriable.
    #[error("transient failure from {service}: {message}")]
    Transient { service: String, message: String },

    /// Rejected without calling the dependency; expected under sustained
    /// outage, so callers log this at lower severity.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Malformed input. Never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The service is not configured in this deployment.
    #[error("service '{0}' is not configured")]
    Unavailable(String),
}

impl ServiceError {
    pub fn transient(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Whether the retry layer should attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
