// src/resilience/breaker.rs
//! Circuit breaker around external service calls.
//!
//! Closed until `failure_threshold` consecutive failures, then open for
//! `recovery_timeout`. After the timeout the next caller is let through as a
//! half-open probe: success closes the circuit, failure reopens it. State
//! transitions happen lazily at observation time; there is no background task.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Probes allowed while half-open before further calls are rejected.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_calls: u32,
}

/// One breaker per external service; failures in one never affect another.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_calls: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the open-to-half-open transition if the
    /// recovery timeout has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|t| t.elapsed() >= self.cfg.recovery_timeout)
                .unwrap_or(true);
            if elapsed {
                inner.state = BreakerState::HalfOpen;
                inner.half_open_calls = 0;
                info!(target: "resilience", breaker = %self.name, "recovery timeout elapsed, half-open");
            }
        }
    }

    /// Run `op` under the breaker. When open, returns `CircuitOpen` without
    /// invoking `op`. The inner lock is never held across the await.
    pub async fn call<T, Fut>(&self, op: Fut) -> ServiceResult<T>
    where
        Fut: Future<Output = ServiceResult<T>>,
    {
        {
            let mut inner = self.inner.lock().expect("breaker mutex poisoned");
            self.refresh(&mut inner);
            match inner.state {
                BreakerState::Open => {
                    return Err(ServiceError::CircuitOpen(self.name.clone()));
                }
                BreakerState::HalfOpen => {
                    if inner.half_open_calls >= self.cfg.half_open_max_calls {
                        return Err(ServiceError::CircuitOpen(self.name.clone()));
                    }
                    inner.half_open_calls += 1;
                }
                BreakerState::Closed => {}
            }
        }

        let outcome = op.await;

        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match &outcome {
            Ok(_) => {
                if inner.state == BreakerState::HalfOpen {
                    info!(target: "resilience", breaker = %self.name, "probe succeeded, closing");
                }
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.half_open_calls = 0;
            }
            // A rejected probe elsewhere must not count as a service failure.
            Err(ServiceError::CircuitOpen(_)) => {}
            Err(_) => {
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                let tripped = inner.state == BreakerState::HalfOpen
                    || inner.failure_count >= self.cfg.failure_threshold;
                if tripped {
                    inner.state = BreakerState::Open;
                    warn!(
                        target: "resilience",
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
        }
        outcome
    }

    /// Force back to closed. Intended for tests and admin tooling.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.half_open_calls = 0;
    }
}
