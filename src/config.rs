// src/config.rs
//! Runtime settings loaded from environment variables (with `.env` support
//! via dotenvy in the binary). Every knob has a default so the service boots
//! with no configuration at all.

use std::time::Duration;

// --- env names ---
pub const ENV_DEDUP_THRESHOLD: &str = "DEDUP_THRESHOLD";
pub const ENV_EMBED_CACHE_CAPACITY: &str = "EMBED_CACHE_CAPACITY";
pub const ENV_EMBED_CACHE_TTL_SECS: &str = "EMBED_CACHE_TTL_SECS";
pub const ENV_QUERY_CACHE_CAPACITY: &str = "QUERY_CACHE_CAPACITY";
pub const ENV_QUERY_CACHE_TTL_SECS: &str = "QUERY_CACHE_TTL_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "RETRY_MAX_ATTEMPTS";
pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_RECOVERY_SECS: &str = "BREAKER_RECOVERY_SECS";
pub const ENV_API_PORT: &str = "API_PORT";

// --- defaults ---
/// Deliberately lower than a conventional near-duplicate threshold (0.85):
/// similarity ≥ 0.70 catches heavily paraphrased same-event articles at some
/// cost of false positives. Recall-biased product policy, kept configurable.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.70;

pub const DEFAULT_EMBED_CACHE_CAPACITY: usize = 2000;
pub const DEFAULT_EMBED_CACHE_TTL_SECS: u64 = 7200;
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 200;
pub const DEFAULT_QUERY_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_RECOVERY_SECS: u64 = 60;
pub const DEFAULT_API_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub dedup_threshold: f32,
    pub embed_cache_capacity: usize,
    pub embed_cache_ttl: Duration,
    pub query_cache_capacity: usize,
    pub query_cache_ttl: Duration,
    pub retry_max_attempts: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery: Duration,
    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            embed_cache_capacity: DEFAULT_EMBED_CACHE_CAPACITY,
            embed_cache_ttl: Duration::from_secs(DEFAULT_EMBED_CACHE_TTL_SECS),
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            query_cache_ttl: Duration::from_secs(DEFAULT_QUERY_CACHE_TTL_SECS),
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_recovery: Duration::from_secs(DEFAULT_BREAKER_RECOVERY_SECS),
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            dedup_threshold: parse_threshold(std::env::var(ENV_DEDUP_THRESHOLD).ok())
                .unwrap_or(d.dedup_threshold),
            embed_cache_capacity: parse_env(ENV_EMBED_CACHE_CAPACITY)
                .unwrap_or(d.embed_cache_capacity),
            embed_cache_ttl: parse_env(ENV_EMBED_CACHE_TTL_SECS)
                .map(Duration::from_secs)
                .unwrap_or(d.embed_cache_ttl),
            query_cache_capacity: parse_env(ENV_QUERY_CACHE_CAPACITY)
                .unwrap_or(d.query_cache_capacity),
            query_cache_ttl: parse_env(ENV_QUERY_CACHE_TTL_SECS)
                .map(Duration::from_secs)
                .unwrap_or(d.query_cache_ttl),
            retry_max_attempts: parse_env(ENV_RETRY_MAX_ATTEMPTS).unwrap_or(d.retry_max_attempts),
            breaker_failure_threshold: parse_env(ENV_BREAKER_FAILURE_THRESHOLD)
                .unwrap_or(d.breaker_failure_threshold),
            breaker_recovery: parse_env(ENV_BREAKER_RECOVERY_SECS)
                .map(Duration::from_secs)
                .unwrap_or(d.breaker_recovery),
            api_port: parse_env(ENV_API_PORT).unwrap_or(d.api_port),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse an optional float and clamp to <0.0..=1.0>.
fn parse_threshold(raw: Option<String>) -> Option<f32> {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .map(|v| v.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!((s.dedup_threshold - 0.70).abs() < 1e-6);
        assert_eq!(s.embed_cache_capacity, 2000);
        assert_eq!(s.query_cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn threshold_parse_clamps() {
        assert_eq!(parse_threshold(Some("1.5".into())), Some(1.0));
        assert_eq!(parse_threshold(Some("-0.2".into())), Some(0.0));
        assert_eq!(parse_threshold(Some("0.85".into())), Some(0.85));
        assert_eq!(parse_threshold(Some("abc".into())), None);
        assert_eq!(parse_threshold(None), None);
    }
}
